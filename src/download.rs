//! The download coordinator.
//!
//! `start` is the engine entry point: it generates a peer id, asks the
//! tracker for peers, loads the durable progress record, registers a pause
//! handle in the registry and runs the download to one of its terminal
//! states.
//!
//! The run loop owns the output file and the status map exclusively. Work
//! flows through two channels: a work queue sized to the number of pieces
//! (so re-queueing can never deadlock) feeding one worker per peer, and a
//! results channel the coordinator alone consumes. Verified pieces are
//! written at their canonical offset, recorded in the progress file, and
//! reported to the progress sink. A pause signal wins the `select!` against
//! results and ends the run immediately; pieces in flight stay unrecorded
//! and are re-queued by the next run.

use crate::error::Error;
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::registry::{TorrentHandle, TorrentRegistry};
use crate::status::DownloadStatus;
use crate::torrent::TorrentFile;
use crate::tracker;
use crate::worker::Worker;

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use rand::Rng;
use serde::Serialize;

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::thread;
use std::time::Instant;

// Port reported to trackers
const PORT: u16 = 6881;

/// Telemetry pushed to the progress sink after every verified piece and on
/// every terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub name: String,
    /// Completion in percent, 0 to 100
    pub progress: f64,
    /// Session download speed in KiB/s
    pub speed: f64,
    /// Estimated seconds until completion
    pub remaining_time: f64,
    pub paused: bool,
}

/// How a download run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every piece was verified and written.
    Complete,
    /// The progress record already covered every piece; nothing was done.
    AlreadyComplete,
    /// A pause signal ended the run. Start again with the same paths to
    /// resume.
    Paused,
}

/// A single download run over a fixed peer set.
pub struct Download {
    peers: Vec<Peer>,
    peer_id: Vec<u8>,
    info_hash: Vec<u8>,
    piece_hashes: Vec<Vec<u8>>,
    piece_length: u32,
    length: u64,
    name: String,
    status: DownloadStatus,
    pause_rx: Receiver<()>,
}

/// Download a torrent: discover peers, register with the registry, run.
///
/// Returns when the download completes, pauses or fails. Resuming is just
/// calling this again with the same output and progress paths; pieces the
/// progress file already records are skipped at enqueue time.
///
/// # Arguments
///
/// * `torrent` - Parsed metainfo.
/// * `output_path` - Where the file content is written.
/// * `progress_path` - Where the progress record is persisted.
/// * `registry` - Registry the live pause handle is registered in.
/// * `progress_tx` - Sink for progress telemetry.
///
pub fn start(
    torrent: &TorrentFile,
    output_path: &Path,
    progress_path: &Path,
    registry: &TorrentRegistry,
    progress_tx: Sender<ProgressEvent>,
) -> Result<DownloadOutcome, Error> {
    let peer_id = generate_peer_id();

    let peers = tracker::request_peers(torrent, &peer_id, PORT)?;
    info!("tracker returned {} peers for {:?}", peers.len(), torrent.name);

    let status = DownloadStatus::load_or_create(progress_path, torrent.piece_count())?;

    let (pause_tx, pause_rx) = bounded::<()>(1);
    registry.register(
        &torrent.name,
        TorrentHandle::new(pause_tx, progress_path.to_path_buf()),
    );

    let mut download = Download::new(torrent, peers, peer_id, status, pause_rx);
    download.run(output_path, progress_path, &progress_tx)
}

/// Generate a random 20-byte peer id for this download run.
fn generate_peer_id() -> Vec<u8> {
    let mut peer_id: Vec<u8> = vec![0; 20];
    let mut rng = rand::thread_rng();
    for x in peer_id.iter_mut() {
        *x = rng.gen();
    }
    peer_id
}

impl Download {
    pub fn new(
        torrent: &TorrentFile,
        peers: Vec<Peer>,
        peer_id: Vec<u8>,
        status: DownloadStatus,
        pause_rx: Receiver<()>,
    ) -> Download {
        Download {
            peers,
            peer_id,
            info_hash: torrent.info_hash.clone(),
            piece_hashes: torrent.piece_hashes.clone(),
            piece_length: torrent.piece_length,
            length: torrent.length,
            name: torrent.name.clone(),
            status,
            pause_rx,
        }
    }

    /// Run the download to a terminal state.
    pub fn run(
        &mut self,
        output_path: &Path,
        progress_path: &Path,
        progress_tx: &Sender<ProgressEvent>,
    ) -> Result<DownloadOutcome, Error> {
        let total_pieces = self.piece_hashes.len() as u32;
        let mut done_pieces = self.status.complete_count();

        if done_pieces == total_pieces {
            info!("{:?} is already fully downloaded", self.name);
            self.emit(progress_tx, 100.0, 0.0, 0.0, false);
            return Ok(DownloadOutcome::AlreadyComplete);
        }

        info!(
            "starting download of {:?} ({}/{} pieces present)",
            self.name, done_pieces, total_pieces
        );

        // The file is a sparse sink addressed by piece offset; pieces land
        // in verification order, not index order
        let output = OpenOptions::new()
            .write(true)
            .create(true)
            .open(output_path)
            .map_err(|e| Error::OutputIo(format!("could not open output file: {e}")))?;

        let (work_tx, work_rx) = bounded::<PieceWork>(total_pieces as usize);
        let (result_tx, result_rx) = bounded::<PieceResult>(0);
        let (done_tx, done_rx) = bounded::<()>(0);

        // Queue capacity equals the piece count, so filling it cannot block
        for index in 0..total_pieces {
            if self.status.is_piece_complete(index) {
                continue;
            }
            let work = PieceWork::new(
                index,
                self.piece_hashes[index as usize].clone(),
                self.piece_size(index),
            );
            if work_tx.send(work).is_err() {
                return Err(Error::OutputIo("work queue closed during setup".to_string()));
            }
        }

        for peer in &self.peers {
            let worker = Worker::new(
                peer.clone(),
                self.peer_id.clone(),
                self.info_hash.clone(),
                work_tx.clone(),
                work_rx.clone(),
                result_tx.clone(),
                done_rx.clone(),
            );
            thread::spawn(move || worker.run());
        }

        // Workers now hold the only result senders; when the last one dies
        // the channel disconnects and the stall is detected below. done_tx
        // stays here so its drop on return wakes every idle worker.
        drop(result_tx);
        let _done_tx = done_tx;

        let started = Instant::now();
        let mut session_bytes: u64 = 0;
        let mut completed_bytes: u64 = (0..total_pieces)
            .filter(|&index| self.status.is_piece_complete(index))
            .map(|index| self.piece_size(index) as u64)
            .sum();

        enum Step {
            Paused,
            PauseGone,
            Result(PieceResult),
            Stalled,
        }

        let mut pause_rx = self.pause_rx.clone();

        while done_pieces < total_pieces {
            let step = select! {
                recv(pause_rx) -> signal => {
                    if signal.is_ok() { Step::Paused } else { Step::PauseGone }
                }
                recv(result_rx) -> msg => match msg {
                    Ok(result) => Step::Result(result),
                    Err(_) => Step::Stalled,
                },
            };

            let result = match step {
                Step::Paused => {
                    info!("download of {:?} paused", self.name);
                    let percent = done_pieces as f64 / total_pieces as f64 * 100.0;
                    self.emit(progress_tx, percent, 0.0, 0.0, true);
                    return Ok(DownloadOutcome::Paused);
                }
                Step::PauseGone => {
                    // The registry dropped the handle; keep downloading
                    // without a pause line
                    warn!("pause handle for {:?} went away", self.name);
                    pause_rx = never();
                    continue;
                }
                Step::Stalled => {
                    return Err(Error::PeerIo(
                        "all peer connections lost with pieces outstanding".to_string(),
                    ))
                }
                Step::Result(result) => result,
            };

            let offset = self.piece_offset(result.index);
            output.write_at(&result.data, offset).map_err(|e| {
                Error::OutputIo(format!(
                    "could not write piece #{} at offset {}: {}",
                    result.index, offset, e
                ))
            })?;

            self.status.mark_complete(result.index);
            self.status.save(progress_path)?;

            done_pieces += 1;
            session_bytes += result.data.len() as u64;
            completed_bytes += result.data.len() as u64;

            let percent = done_pieces as f64 / total_pieces as f64 * 100.0;
            let elapsed = started.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 {
                session_bytes as f64 / 1024.0 / elapsed
            } else {
                0.0
            };
            let remaining_bytes = self.length - completed_bytes;
            let remaining_time = if speed > 0.0 {
                remaining_bytes as f64 / 1024.0 / speed
            } else {
                0.0
            };

            info!(
                "({:.2}%) downloaded piece #{} of {:?}",
                percent, result.index, self.name
            );
            self.emit(progress_tx, percent, speed, remaining_time, false);
        }

        info!("download of {:?} complete", self.name);

        Ok(DownloadOutcome::Complete)
    }

    fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    fn piece_size(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let mut end = begin + self.piece_length as u64;
        if end > self.length {
            end = self.length;
        }
        (end - begin) as u32
    }

    fn emit(
        &self,
        progress_tx: &Sender<ProgressEvent>,
        progress: f64,
        speed: f64,
        remaining_time: f64,
        paused: bool,
    ) {
        let event = ProgressEvent {
            name: self.name.clone(),
            progress,
            speed,
            remaining_time,
            paused,
        };

        if progress_tx.send(event).is_err() {
            warn!("progress sink for {:?} is gone", self.name);
        }
    }
}
