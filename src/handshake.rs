//! The BitTorrent handshake.
//!
//! The handshake is the first thing exchanged on a fresh peer connection
//! and is a fixed 68-byte frame:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte, length of the protocol string (19)
//! - **pstr**: "BitTorrent protocol"
//! - **reserved**: 8 zero bytes, kept for protocol extensions
//! - **info_hash**: 20 bytes identifying the torrent
//! - **peer_id**: 20 bytes identifying the peer
//!
//! Validating the echoed info-hash is what keeps a client from joining the
//! wrong swarm.

use crate::error::Error;

const PROTOCOL_ID: &str = "BitTorrent protocol";

/// A handshake frame, ours or a remote peer's.
pub struct Handshake {
    pub pstr: Vec<u8>,
    pub reserved: Vec<u8>,
    pub info_hash: Vec<u8>,
    pub peer_id: Vec<u8>,
}

impl Handshake {
    /// Build a handshake advertising the standard protocol string.
    ///
    /// # Arguments
    ///
    /// * `peer_id` - 20-byte identifier for this client.
    /// * `info_hash` - 20-byte SHA-1 hash of the torrent info dictionary.
    ///
    pub fn new(peer_id: Vec<u8>, info_hash: Vec<u8>) -> Self {
        Handshake {
            pstr: String::from(PROTOCOL_ID).into_bytes(),
            reserved: vec![0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serialize the handshake for transmission. The standard protocol
    /// string yields a 68-byte frame.
    pub fn serialize(&self) -> Vec<u8> {
        let mut serialized: Vec<u8> = Vec::with_capacity(49 + self.pstr.len());

        serialized.push(self.pstr.len() as u8);
        serialized.extend_from_slice(&self.pstr);
        serialized.extend_from_slice(&self.reserved);
        serialized.extend_from_slice(&self.info_hash);
        serialized.extend_from_slice(&self.peer_id);

        serialized
    }
}

/// Deserialize a received handshake.
///
/// `buf` holds everything after the pstrlen byte; `pstrlen` is the value of
/// that first byte. Field offsets within `buf`:
///
/// - pstr: `0..pstrlen`
/// - reserved: `pstrlen..pstrlen+8`
/// - info_hash: `pstrlen+8..pstrlen+28`
/// - peer_id: `pstrlen+28..pstrlen+48`
pub fn deserialize_handshake(buf: &[u8], pstrlen: usize) -> Result<Handshake, Error> {
    if buf.len() < pstrlen + 48 {
        return Err(Error::HandshakeFailed(
            "received truncated handshake from peer".to_string(),
        ));
    }

    let pstr = buf[0..pstrlen].to_vec();
    if pstr != PROTOCOL_ID.as_bytes() {
        return Err(Error::HandshakeFailed(
            "received unknown protocol string from peer".to_string(),
        ));
    }

    let reserved = buf[pstrlen..(pstrlen + 8)].to_vec();
    let info_hash = buf[(pstrlen + 8)..(pstrlen + 28)].to_vec();
    let peer_id = buf[(pstrlen + 28)..(pstrlen + 48)].to_vec();

    Ok(Handshake {
        pstr,
        reserved,
        info_hash,
        peer_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_handshake_is_68_bytes() {
        let handshake = Handshake::new(vec![1; 20], vec![2; 20]);
        let serialized = handshake.serialize();

        assert_eq!(serialized.len(), 68);
        assert_eq!(serialized[0], 19);
        assert_eq!(&serialized[1..20], PROTOCOL_ID.as_bytes());
        assert_eq!(&serialized[20..28], &[0; 8]);
        assert_eq!(&serialized[28..48], &[2; 20][..]);
        assert_eq!(&serialized[48..68], &[1; 20][..]);
    }

    #[test]
    fn handshake_round_trip() {
        let handshake = Handshake::new(vec![7; 20], vec![9; 20]);
        let serialized = handshake.serialize();

        let pstrlen = serialized[0] as usize;
        let decoded = deserialize_handshake(&serialized[1..], pstrlen).unwrap();

        assert_eq!(decoded.pstr, PROTOCOL_ID.as_bytes());
        assert_eq!(decoded.info_hash, vec![9; 20]);
        assert_eq!(decoded.peer_id, vec![7; 20]);
    }

    #[test]
    fn deserialize_rejects_unknown_protocol() {
        let mut serialized = Handshake::new(vec![1; 20], vec![2; 20]).serialize();
        serialized[1] = b'X';

        let pstrlen = serialized[0] as usize;
        assert!(deserialize_handshake(&serialized[1..], pstrlen).is_err());
    }

    #[test]
    fn deserialize_rejects_truncated_frame() {
        let serialized = Handshake::new(vec![1; 20], vec![2; 20]).serialize();
        assert!(deserialize_handshake(&serialized[1..40], 19).is_err());
    }
}
