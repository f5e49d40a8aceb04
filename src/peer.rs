//! Peer addresses and piece bitfields.
//!
//! Trackers hand back peers in a compact binary list of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! both fields in network byte order. A peer's piece availability travels
//! as a bitfield, one bit per piece index, most significant bit first:
//!
//! ```text
//! Byte 0: [piece 0, 1, 2, 3, 4, 5, 6, 7]
//! Byte 1: [piece 8, 9, 10, 11, 12, 13, 14, 15]
//! ...
//! ```

use crate::error::Error;

use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;

const PEER_SIZE: usize = 6;

/// A remote peer address obtained from the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parse a compact peer list received from a tracker.
///
/// # Arguments
///
/// * `compact` - Concatenated 6-byte peer entries.
///
pub fn parse_compact_peers(compact: &[u8]) -> Result<Vec<Peer>, Error> {
    // Check tracker peers are valid
    if !compact.len().is_multiple_of(PEER_SIZE) {
        return Err(Error::TrackerUnavailable(
            "received invalid peers from tracker".to_string(),
        ));
    }

    let nb_peers = compact.len() / PEER_SIZE;
    let mut peers = Vec::with_capacity(nb_peers);

    for i in 0..nb_peers {
        let offset = i * PEER_SIZE;

        // Read peer IP address
        let ip = Ipv4Addr::new(
            compact[offset],
            compact[offset + 1],
            compact[offset + 2],
            compact[offset + 3],
        );

        // Read peer port
        let mut port_cursor = Cursor::new(&compact[offset + 4..offset + 6]);
        let port = port_cursor
            .read_u16::<BigEndian>()
            .map_err(|_| Error::TrackerUnavailable("received invalid peers from tracker".to_string()))?;

        peers.push(Peer { ip, port });
    }

    Ok(peers)
}

/// A remote peer's advertised piece availability.
#[derive(Debug, Clone, Default)]
pub struct Bitfield {
    bytes: Vec<u8>,
}

impl Bitfield {
    pub fn new() -> Bitfield {
        Bitfield { bytes: vec![] }
    }

    /// Install a bitfield from the wire payload of a bitfield message.
    pub fn from_bytes(bytes: Vec<u8>) -> Bitfield {
        Bitfield { bytes }
    }

    /// Check whether the peer claims to have a piece.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        if byte_index < self.bytes.len() {
            return self.bytes[byte_index] >> (7 - offset) & 1 != 0;
        }
        false
    }

    /// Mark a piece as available, growing the bitfield if the index falls
    /// beyond its current capacity.
    pub fn set_piece(&mut self, index: u32) {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        if byte_index >= self.bytes.len() {
            self.bytes.resize(byte_index + 1, 0);
        }
        self.bytes[byte_index] |= 1 << (7 - offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compact_peer_list() {
        let compact = [
            192, 168, 1, 1, 0x1A, 0xE1, // 192.168.1.1:6881
            10, 0, 0, 2, 0x1A, 0xE2, // 10.0.0.2:6882
        ];

        let peers = parse_compact_peers(&compact).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(peers[0].port, 6881);
        assert_eq!(peers[1].ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(peers[1].port, 6882);
    }

    #[test]
    fn parse_compact_peers_rejects_truncated_entries() {
        let compact = [192, 168, 1, 1, 0x1A];
        assert!(parse_compact_peers(&compact).is_err());
    }

    #[test]
    fn bitfield_lookup_is_msb_first() {
        // 0b10100000: pieces 0 and 2 of the first byte
        let bitfield = Bitfield::from_bytes(vec![0b1010_0000, 0b0000_0001]);

        assert!(bitfield.has_piece(0));
        assert!(!bitfield.has_piece(1));
        assert!(bitfield.has_piece(2));
        assert!(bitfield.has_piece(15));
        assert!(!bitfield.has_piece(14));
    }

    #[test]
    fn bitfield_lookup_out_of_bounds_is_false() {
        let bitfield = Bitfield::from_bytes(vec![0xFF]);
        assert!(!bitfield.has_piece(8));
        assert!(!bitfield.has_piece(1000));
    }

    #[test]
    fn bitfield_set_grows_on_demand() {
        let mut bitfield = Bitfield::new();
        bitfield.set_piece(20);

        assert!(bitfield.has_piece(20));
        assert!(!bitfield.has_piece(19));
        assert!(!bitfield.has_piece(21));
    }
}
