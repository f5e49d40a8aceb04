//! Piece workers.
//!
//! One worker drives one peer connection. After bringing the connection up
//! (handshake, bitfield, unchoke, interested) it pulls work items from the
//! shared queue:
//!
//! 1. Items the peer does not advertise go back to the queue tail so the
//!    worker never blocks on a piece its peer cannot serve.
//! 2. Otherwise the worker pipelines block requests, keeping up to
//!    `MAX_BACKLOG` outstanding, and applies incoming messages until the
//!    piece buffer is full.
//! 3. The assembled piece is SHA-1 verified. A mismatch re-queues the item
//!    and keeps the peer; corruption can be transient.
//! 4. Verified pieces are announced back with `have` and published on the
//!    results channel.
//!
//! Any I/O error mid-piece re-queues the current item and ends the worker;
//! the remaining peers drain the queue. Workers notice the coordinator
//! going away through the `done` channel and exit.

use crate::client::Client;
use crate::error::Error;
use crate::message::{self, MESSAGE_CHOKE, MESSAGE_HAVE, MESSAGE_PIECE, MESSAGE_UNCHOKE};
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};

use boring::sha::Sha1;
use crossbeam_channel::{select, Receiver, Sender};

/// Maximum number of outstanding block requests on one peer connection.
pub const MAX_BACKLOG: u32 = 5;

/// Largest number of bytes a single block request may ask for.
pub const MAX_BLOCK_SIZE: u32 = 16384;

// Read/write deadline while bringing the connection up
const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

// Read/write deadline while a piece is in flight
const PIECE_TIMEOUT_SECS: u64 = 30;

/// Downloads pieces from a single peer.
pub struct Worker {
    peer: Peer,
    peer_id: Vec<u8>,
    info_hash: Vec<u8>,
    work_tx: Sender<PieceWork>,
    work_rx: Receiver<PieceWork>,
    result_tx: Sender<PieceResult>,
    done_rx: Receiver<()>,
}

/// Per-piece assembly state, scratch to one download attempt.
struct PieceProgress {
    buf: Vec<u8>,
    downloaded: u32,
    requested: u32,
    backlog: u32,
}

impl PieceProgress {
    fn new(length: u32) -> PieceProgress {
        PieceProgress {
            buf: vec![0; length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    /// Read one message from the peer and fold it into the download state.
    /// Keep-alives are ignored, as are message ids outside the protocol
    /// subset this engine speaks.
    fn read_message(&mut self, client: &mut Client, work: &PieceWork) -> Result<(), Error> {
        let message = match client.read_message()? {
            Some(message) => message,
            None => return Ok(()),
        };

        match message.id {
            MESSAGE_CHOKE => client.set_choked(true),
            MESSAGE_UNCHOKE => client.set_choked(false),
            MESSAGE_HAVE => {
                let index = message::parse_have(&message)?;
                client.set_piece(index);
            }
            MESSAGE_PIECE => {
                let n = message::parse_piece(work.index, &mut self.buf, &message)?;
                self.downloaded += n as u32;
                self.backlog = self.backlog.saturating_sub(1);
            }
            _ => {}
        }

        Ok(())
    }
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: Vec<u8>,
        info_hash: Vec<u8>,
        work_tx: Sender<PieceWork>,
        work_rx: Receiver<PieceWork>,
        result_tx: Sender<PieceResult>,
        done_rx: Receiver<()>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            work_tx,
            work_rx,
            result_tx,
            done_rx,
        }
    }

    /// Run the worker until the queue closes, the coordinator goes away or
    /// the peer fails.
    pub fn run(&self) {
        let mut client = match Client::new(self.peer.clone()) {
            Ok(client) => client,
            Err(e) => {
                debug!("dropping peer {}: {}", self.peer, e);
                return;
            }
        };

        if let Err(e) = self.prepare(&mut client) {
            debug!("dropping peer {}: {}", self.peer, e);
            return;
        }

        info!("completed handshake with peer {}", self.peer);

        loop {
            let work: PieceWork = select! {
                recv(self.work_rx) -> msg => match msg {
                    Ok(work) => work,
                    Err(_) => return,
                },
                recv(self.done_rx) -> _ => return,
            };

            // Pieces this peer does not have go back on the queue for
            // someone else
            if !client.has_piece(work.index) {
                if self.work_tx.send(work).is_err() {
                    return;
                }
                continue;
            }

            let data = match self.attempt_piece(&mut client, &work) {
                Ok(data) => data,
                Err(e) => {
                    warn!("peer {} failed on piece #{}: {}", self.peer, work.index, e);
                    let _ = self.work_tx.send(work);
                    return;
                }
            };

            if let Err(e) = verify_piece(&work, &data) {
                warn!("{}, re-queueing", e);
                if self.work_tx.send(work).is_err() {
                    return;
                }
                continue;
            }

            debug!("verified piece #{} from peer {}", work.index, self.peer);

            // Courtesy announce; losing it is not worth losing the piece
            if let Err(e) = client.send_have(work.index) {
                debug!("could not announce piece #{} to {}: {}", work.index, self.peer, e);
            }

            if self.result_tx.send(PieceResult::new(work.index, data)).is_err() {
                return;
            }
        }
    }

    fn prepare(&self, client: &mut Client) -> Result<(), Error> {
        client.set_connection_timeout(HANDSHAKE_TIMEOUT_SECS)?;
        client.handshake_with_peer(&self.peer_id, &self.info_hash)?;
        client.read_bitfield()?;
        client.send_unchoke()?;
        client.send_interested()?;
        Ok(())
    }

    /// Download one piece over the client connection.
    ///
    /// While the peer keeps us unchoked, block requests are pipelined up to
    /// `MAX_BACKLOG` deep; each request asks for at most `MAX_BLOCK_SIZE`
    /// bytes. The loop then applies one incoming message at a time until
    /// the whole piece has arrived.
    fn attempt_piece(&self, client: &mut Client, work: &PieceWork) -> Result<Vec<u8>, Error> {
        client.set_connection_timeout(PIECE_TIMEOUT_SECS)?;

        let mut progress = PieceProgress::new(work.length);

        while progress.downloaded < work.length {
            if !client.is_choked() {
                while progress.backlog < MAX_BACKLOG && progress.requested < work.length {
                    let block_size = MAX_BLOCK_SIZE.min(work.length - progress.requested);

                    client.send_request(work.index, progress.requested, block_size)?;

                    progress.backlog += 1;
                    progress.requested += block_size;
                }
            }

            progress.read_message(client, work)?;
        }

        Ok(progress.buf)
    }
}

fn verify_piece(work: &PieceWork, data: &[u8]) -> Result<(), Error> {
    let mut hasher = Sha1::new();
    hasher.update(data);

    if hasher.finish().to_vec() != work.hash {
        return Err(Error::PieceIntegrityFailed(work.index));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_piece_accepts_matching_hash() {
        let data = b"some piece data";
        let mut hasher = Sha1::new();
        hasher.update(data);
        let work = PieceWork::new(0, hasher.finish().to_vec(), data.len() as u32);

        assert!(verify_piece(&work, data).is_ok());
    }

    #[test]
    fn verify_piece_rejects_corruption() {
        let data = b"some piece data";
        let mut hasher = Sha1::new();
        hasher.update(data);
        let work = PieceWork::new(3, hasher.finish().to_vec(), data.len() as u32);

        let mut corrupted = data.to_vec();
        corrupted[0] ^= 0xFF;

        let err = verify_piece(&work, &corrupted).unwrap_err();
        assert!(matches!(err, Error::PieceIntegrityFailed(3)));
    }
}
