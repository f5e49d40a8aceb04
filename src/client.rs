//! Client side of one peer wire connection.
//!
//! A `Client` owns the TCP stream to a single remote peer and the protocol
//! state attached to it. Bringing a connection up means:
//!
//! 1. **Dial** the peer with a short connect deadline.
//! 2. **Handshake** and verify the echoed info-hash.
//! 3. **Bitfield**: receive the peer's piece availability.
//!
//! After that the client is a passive state machine. It frames and parses
//! messages on demand; pipelining and flow control are driven by the worker
//! that owns it. A choked client must not expect answers to its requests
//! until the peer unchokes it.

use crate::error::Error;
use crate::handshake::{deserialize_handshake, Handshake};
use crate::message::*;
use crate::peer::{Bitfield, Peer};

use byteorder::{BigEndian, ReadBytesExt};

use std::io::{Cursor, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

// TCP connect deadline when dialing a peer
const CONNECT_TIMEOUT_SECS: u64 = 3;

// Upper bound on a single framed message; the largest legitimate frame is
// a piece message of one 16 KiB block plus headers
const MAX_MESSAGE_LEN: usize = 1 << 20;

/// A connection to one remote peer.
pub struct Client {
    peer: Peer,
    conn: TcpStream,
    bitfield: Bitfield,
    choked: bool,
}

impl Client {
    /// Dial a peer. Failure to establish TCP within the connect deadline is
    /// a handshake failure: the peer is simply not usable.
    pub fn new(peer: Peer) -> Result<Client, Error> {
        let peer_socket = SocketAddr::new(IpAddr::V4(peer.ip), peer.port);
        let conn = TcpStream::connect_timeout(&peer_socket, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .map_err(|e| Error::HandshakeFailed(format!("could not connect to peer {peer}: {e}")))?;

        debug!("connected to peer {}", peer);

        Ok(Client {
            peer,
            conn,
            bitfield: Bitfield::new(),
            choked: true,
        })
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    /// Check the peer's bitfield for a piece.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Record a piece the peer announced after its initial bitfield.
    pub fn set_piece(&mut self, index: u32) {
        self.bitfield.set_piece(index);
    }

    /// Arm read and write deadlines on the connection so a silent peer
    /// cannot stall its worker forever.
    pub fn set_connection_timeout(&self, secs: u64) -> Result<(), Error> {
        self.conn
            .set_write_timeout(Some(Duration::from_secs(secs)))
            .map_err(|_| Error::PeerIo("could not set write timeout".to_string()))?;
        self.conn
            .set_read_timeout(Some(Duration::from_secs(secs)))
            .map_err(|_| Error::PeerIo("could not set read timeout".to_string()))?;

        Ok(())
    }

    /// Exchange handshakes with the remote peer.
    ///
    /// Sends our 68-byte handshake, reads the peer's, and verifies that the
    /// peer is serving the same torrent by comparing info-hashes.
    pub fn handshake_with_peer(&mut self, peer_id: &[u8], info_hash: &[u8]) -> Result<(), Error> {
        let handshake = Handshake::new(peer_id.to_vec(), info_hash.to_vec());

        if self.conn.write_all(&handshake.serialize()).is_err() {
            return Err(Error::HandshakeFailed(
                "could not send handshake to peer".to_string(),
            ));
        }

        // Read handshake received from remote peer
        let handshake_len = self.read_handshake_len()?;
        let mut handshake_buf: Vec<u8> = vec![0; 48 + handshake_len];
        if self.conn.read_exact(&mut handshake_buf).is_err() {
            return Err(Error::HandshakeFailed(
                "could not read handshake received from peer".to_string(),
            ));
        }

        // Check info hash received from remote peer
        let handshake_decoded = deserialize_handshake(&handshake_buf, handshake_len)?;
        if handshake_decoded.info_hash != info_hash {
            return Err(Error::HandshakeFailed(
                "peer answered with a different info-hash".to_string(),
            ));
        }

        Ok(())
    }

    fn read_handshake_len(&mut self) -> Result<usize, Error> {
        let mut buf = [0; 1];
        if self.conn.read_exact(&mut buf).is_err() {
            return Err(Error::HandshakeFailed(
                "could not read handshake length received from peer".to_string(),
            ));
        }

        let handshake_len = buf[0];
        if handshake_len == 0 {
            return Err(Error::HandshakeFailed(
                "invalid handshake length received from peer".to_string(),
            ));
        }

        Ok(handshake_len as usize)
    }

    /// Read the peer's initial bitfield message and install it.
    ///
    /// Peers send their bitfield right after the handshake. Anything else
    /// in that slot means the peer is not worth keeping.
    pub fn read_bitfield(&mut self) -> Result<(), Error> {
        let message = match self.read_message()? {
            Some(message) => message,
            None => {
                return Err(Error::HandshakeFailed(
                    "expected bitfield, got keep-alive".to_string(),
                ))
            }
        };

        if message.id != MESSAGE_BITFIELD {
            return Err(Error::HandshakeFailed(format!(
                "expected bitfield, got message id {}",
                message.id
            )));
        }

        self.bitfield = Bitfield::from_bytes(message.payload);

        Ok(())
    }

    /// Read the next fully framed message. Returns `None` for a keep-alive.
    pub fn read_message(&mut self) -> Result<Option<Message>, Error> {
        let message_len = self.read_message_len()?;

        // A zero length prefix is a keep-alive
        if message_len == 0 {
            debug!("received keep-alive from peer {}", self.peer);
            return Ok(None);
        }

        if message_len > MAX_MESSAGE_LEN {
            return Err(Error::PeerIo(format!(
                "peer announced an oversized message of {message_len} bytes"
            )));
        }

        let mut message_buf: Vec<u8> = vec![0; message_len];
        if self.conn.read_exact(&mut message_buf).is_err() {
            return Err(Error::PeerIo(
                "could not read message received from peer".to_string(),
            ));
        }

        let message = deserialize_message(&message_buf)?;

        Ok(Some(message))
    }

    fn read_message_len(&mut self) -> Result<usize, Error> {
        let mut buf = [0; 4];
        if self.conn.read_exact(&mut buf).is_err() {
            return Err(Error::PeerIo(
                "could not read message length received from peer".to_string(),
            ));
        }

        let mut cursor = Cursor::new(&buf);
        let message_len = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| Error::PeerIo("could not read message length received from peer".to_string()))?;

        Ok(message_len as usize)
    }

    /// Tell the peer we will answer its requests.
    pub fn send_unchoke(&mut self) -> Result<(), Error> {
        self.send_message(Message::new(MESSAGE_UNCHOKE), "UNCHOKE")
    }

    /// Tell the peer we want to download from it. Required before requests
    /// will be honored.
    pub fn send_interested(&mut self) -> Result<(), Error> {
        self.send_message(Message::new(MESSAGE_INTERESTED), "INTERESTED")
    }

    /// Request a block of a piece.
    ///
    /// # Arguments
    ///
    /// * `index` - Piece index.
    /// * `begin` - Byte offset of the block within the piece.
    /// * `length` - Block length, at most 16384 bytes.
    ///
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<(), Error> {
        let mut payload: Vec<u8> = Vec::with_capacity(12);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());

        debug!(
            "requesting piece {} [{}:{}] from peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );

        self.send_message(Message::new_with_payload(MESSAGE_REQUEST, payload), "REQUEST")
    }

    /// Announce to the peer that we now hold a verified piece.
    pub fn send_have(&mut self, index: u32) -> Result<(), Error> {
        let payload = index.to_be_bytes().to_vec();
        self.send_message(Message::new_with_payload(MESSAGE_HAVE, payload), "HAVE")
    }

    fn send_message(&mut self, message: Message, name: &str) -> Result<(), Error> {
        if self.conn.write_all(&message.serialize()).is_err() {
            return Err(Error::PeerIo(format!(
                "could not send {} to peer {}",
                name, self.peer
            )));
        }

        Ok(())
    }
}
