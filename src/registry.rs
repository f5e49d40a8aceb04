//! Process-wide registry of running downloads.
//!
//! The registry maps a torrent name to an opaque handle holding only a
//! pause sender, a paused flag and the progress-file path. The coordinator
//! keeps the receive end of the pause channel, so there is no ownership
//! cycle between them: external callers address a running download by name,
//! the coordinator never knows about the registry after registration.
//!
//! Progress shown by `get` and `list_active` is computed by re-reading the
//! progress file; the live status map belongs to the coordinator alone.

use crate::status::DownloadStatus;

use crossbeam_channel::Sender;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Pause handle and bookkeeping for one registered download.
pub struct TorrentHandle {
    pause_tx: Sender<()>,
    paused: bool,
    progress_path: PathBuf,
}

impl TorrentHandle {
    pub fn new(pause_tx: Sender<()>, progress_path: PathBuf) -> TorrentHandle {
        TorrentHandle {
            pause_tx,
            paused: false,
            progress_path,
        }
    }
}

/// Snapshot of a registered download.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTorrent {
    pub name: String,
    /// Completion in percent, read from the progress file
    pub progress: f64,
    pub paused: bool,
}

/// Name to handle table, guarded by a single mutex.
#[derive(Default)]
pub struct TorrentRegistry {
    torrents: Mutex<HashMap<String, TorrentHandle>>,
}

impl TorrentRegistry {
    pub fn new() -> TorrentRegistry {
        TorrentRegistry {
            torrents: Mutex::new(HashMap::new()),
        }
    }

    /// Register a download under its torrent name, replacing any previous
    /// registration (a resumed download re-registers with a fresh pause
    /// channel).
    pub fn register(&self, name: &str, handle: TorrentHandle) {
        let mut torrents = self.torrents.lock().unwrap();
        torrents.insert(name.to_string(), handle);
    }

    /// Signal a running download to pause. Idempotent: the paused flag
    /// guards the one-shot signal, so pausing twice is a no-op. Returns
    /// false when the name is unknown.
    pub fn pause(&self, name: &str) -> bool {
        let mut torrents = self.torrents.lock().unwrap();
        let Some(handle) = torrents.get_mut(name) else {
            return false;
        };

        if !handle.paused {
            handle.paused = true;
            // The coordinator may already have returned; the signal is then
            // harmlessly lost
            let _ = handle.pause_tx.try_send(());
        }

        true
    }

    /// Snapshot one registered download by name.
    pub fn get(&self, name: &str) -> Option<ActiveTorrent> {
        let torrents = self.torrents.lock().unwrap();
        torrents.get(name).map(|handle| snapshot(name, handle))
    }

    /// Forget a download. The coordinator, if still running, keeps going;
    /// it only loses its pause line.
    pub fn remove(&self, name: &str) -> bool {
        let mut torrents = self.torrents.lock().unwrap();
        torrents.remove(name).is_some()
    }

    /// Snapshot every registered download, with completion percent computed
    /// from each progress file.
    pub fn list_active(&self) -> Vec<ActiveTorrent> {
        let torrents = self.torrents.lock().unwrap();

        let mut active: Vec<ActiveTorrent> = torrents
            .iter()
            .map(|(name, handle)| snapshot(name, handle))
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));

        active
    }
}

fn snapshot(name: &str, handle: &TorrentHandle) -> ActiveTorrent {
    let progress = match DownloadStatus::load(&handle.progress_path) {
        Ok(Some(status)) => status.percent(),
        _ => 0.0,
    };

    ActiveTorrent {
        name: name.to_string(),
        progress,
        paused: handle.paused,
    }
}
