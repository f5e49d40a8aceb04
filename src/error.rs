//! Error kinds for the download engine.
//!
//! Peer-scoped failures (`HandshakeFailed`, `PieceIntegrityFailed`,
//! `PeerIo`) are absorbed by the workers and the coordinator: the peer is
//! dropped or the piece re-queued, and the download continues. Only
//! `MetainfoInvalid`, `TrackerUnavailable` and `OutputIo` surface to the
//! caller of the engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed bencoding, a multi-file torrent, or inconsistent piece
    /// geometry. Fatal to the download.
    #[error("invalid metainfo: {0}")]
    MetainfoInvalid(String),

    /// The tracker could not be reached or answered nonsense. Fatal to the
    /// download attempt.
    #[error("tracker unavailable: {0}")]
    TrackerUnavailable(String),

    /// TCP dial failure or a bad handshake exchange. The peer is dropped.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A downloaded piece did not hash to its expected value. The piece is
    /// re-queued and the peer is kept.
    #[error("piece #{0} failed integrity check")]
    PieceIntegrityFailed(u32),

    /// Read or write error on a peer connection. The piece is re-queued and
    /// the peer is dropped.
    #[error("peer i/o error: {0}")]
    PeerIo(String),

    /// Failure writing the output file or the progress file. Fatal.
    #[error("output i/o error: {0}")]
    OutputIo(String),
}
