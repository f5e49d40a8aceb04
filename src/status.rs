//! Durable download progress.
//!
//! The coordinator keeps a `DownloadStatus` in memory and rewrites it to a
//! per-torrent JSON file after every verified piece:
//!
//! ```json
//! { "pieces": { "0": true, "3": true }, "total_pieces": 8 }
//! ```
//!
//! An entry is only ever marked true after the piece bytes have been
//! written at their offset in the output file, so a reload after a crash
//! never claims data that is not on disk. A malformed progress file resets
//! to empty; the cost is re-downloading pieces that were already complete.

use crate::error::Error;

use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

/// Which pieces of a torrent have been verified and written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStatus {
    pieces: HashMap<u32, bool>,
    total_pieces: u32,
}

impl DownloadStatus {
    pub fn new(total_pieces: u32) -> DownloadStatus {
        DownloadStatus {
            pieces: HashMap::new(),
            total_pieces,
        }
    }

    /// Load a progress file. Returns `None` when the file does not exist or
    /// does not parse.
    pub fn load(path: &Path) -> Result<Option<DownloadStatus>, Error> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::OutputIo(format!(
                    "could not read progress file: {e}"
                )))
            }
        };

        match serde_json::from_slice(&data) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!("progress file {:?} is malformed, starting over: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Load the progress file for a torrent with `total_pieces` pieces, or
    /// start an empty record if there is none.
    pub fn load_or_create(path: &Path, total_pieces: u32) -> Result<DownloadStatus, Error> {
        match DownloadStatus::load(path)? {
            Some(mut status) => {
                status.total_pieces = total_pieces;
                Ok(status)
            }
            None => Ok(DownloadStatus::new(total_pieces)),
        }
    }

    /// Persist the record by create, truncate, write, close.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let file = File::create(path)
            .map_err(|e| Error::OutputIo(format!("could not create progress file: {e}")))?;

        serde_json::to_writer(file, self)
            .map_err(|e| Error::OutputIo(format!("could not write progress file: {e}")))?;

        Ok(())
    }

    pub fn is_piece_complete(&self, index: u32) -> bool {
        self.pieces.get(&index).copied().unwrap_or(false)
    }

    pub fn mark_complete(&mut self, index: u32) {
        self.pieces.insert(index, true);
    }

    pub fn complete_count(&self) -> u32 {
        self.pieces.values().filter(|&&done| done).count() as u32
    }

    pub fn total_pieces(&self) -> u32 {
        self.total_pieces
    }

    pub fn percent(&self) -> f64 {
        if self.total_pieces == 0 {
            return 0.0;
        }
        self.complete_count() as f64 / self.total_pieces as f64 * 100.0
    }
}
