//! # Remora
//!
//! A resumable BitTorrent download engine for single-file torrents.
//!
//! ## Architecture
//!
//! - **Metainfo** (`torrent`): bencoded descriptor parsing and info-hash
//!   computation
//! - **Tracker** (`tracker`): HTTP and UDP announce, compact peer lists
//! - **Peer wire** (`handshake`, `message`, `client`): one passive protocol
//!   state machine per TCP connection
//! - **Workers** (`worker`, `piece`): one thread per peer pulling piece
//!   work from a shared queue, pipelining block requests, verifying SHA-1
//! - **Coordinator** (`download`): owns the output file and the progress
//!   record, collects verified pieces, emits telemetry, honors pause
//! - **Registry** (`registry`): process-wide name to pause-handle table
//!
//! Downloads are resumable: progress is persisted to a JSON file after
//! every verified piece, and a later run against the same paths skips the
//! pieces already on disk.
//!
//! The crate exposes the control surface an embedding application needs:
//! [`start`], [`TorrentRegistry::pause`], [`TorrentRegistry::list_active`],
//! and the [`ProgressEvent`] stream.

#[macro_use]
extern crate log;

pub mod client;
pub mod download;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod registry;
pub mod status;
pub mod torrent;
pub mod tracker;
pub mod worker;

pub use download::{start, Download, DownloadOutcome, ProgressEvent};
pub use error::Error;
pub use registry::{ActiveTorrent, TorrentHandle, TorrentRegistry};
pub use status::DownloadStatus;
pub use torrent::TorrentFile;
