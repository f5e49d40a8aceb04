//! Work items exchanged between the coordinator and the piece workers.
//!
//! A `PieceWork` describes one piece to fetch and is immutable once it is
//! on the work queue; failed attempts put the same item back on the queue
//! tail. A `PieceResult` is an assembled, hash-verified piece on its way to
//! the coordinator. Per-attempt download state lives with the worker, not
//! here.

/// One piece to download: its index, expected SHA-1 hash and exact length
/// in bytes (the final piece of a torrent is usually shorter).
#[derive(Debug, Clone)]
pub struct PieceWork {
    pub index: u32,
    pub hash: Vec<u8>,
    pub length: u32,
}

/// A verified piece produced by a worker, consumed exactly once by the
/// coordinator.
#[derive(Debug, Clone)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}

impl PieceWork {
    pub fn new(index: u32, hash: Vec<u8>, length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
        }
    }
}

impl PieceResult {
    pub fn new(index: u32, data: Vec<u8>) -> PieceResult {
        PieceResult { index, data }
    }
}
