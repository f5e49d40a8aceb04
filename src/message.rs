//! Peer wire messages.
//!
//! After the handshake, everything on a peer connection is a
//! length-prefixed message:
//!
//! ```text
//! <length: u32 big-endian><id: u8><payload>
//! ```
//!
//! A zero length prefix is a keep-alive and carries no id or payload.
//!
//! | ID | Name | Payload |
//! |----|------------|----------------------------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 4 | HAVE | piece index |
//! | 5 | BITFIELD | piece availability bits |
//! | 6 | REQUEST | index, begin, length |
//! | 7 | PIECE | index, begin, block data |
//!
//! Ids outside this table are tolerated and ignored by the download path.

use crate::error::Error;

use byteorder::{BigEndian, ReadBytesExt};

use std::io::Cursor;

pub type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;

#[derive(Debug)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a new message without payload.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a new message with a payload.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Self {
        Message { id, payload }
    }

    /// Serialize the message with its length prefix.
    pub fn serialize(&self) -> Vec<u8> {
        let message_len = 1 + self.payload.len();

        let mut serialized: Vec<u8> = Vec::with_capacity(4 + message_len);
        serialized.extend_from_slice(&(message_len as u32).to_be_bytes());
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        serialized
    }
}

/// Deserialize a message from the bytes following the length prefix.
pub fn deserialize_message(message_buf: &[u8]) -> Result<Message, Error> {
    if message_buf.is_empty() {
        return Err(Error::PeerIo(
            "received empty message from peer".to_string(),
        ));
    }

    let id: MessageId = message_buf[0];
    let payload: Vec<u8> = message_buf[1..].to_vec();

    Ok(Message::new_with_payload(id, payload))
}

/// Extract the piece index announced by a HAVE message.
pub fn parse_have(message: &Message) -> Result<u32, Error> {
    if message.id != MESSAGE_HAVE || message.payload.len() != 4 {
        return Err(Error::PeerIo(
            "received invalid HAVE message from peer".to_string(),
        ));
    }

    let mut payload_cursor = Cursor::new(&message.payload);
    let index = payload_cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::PeerIo("received invalid HAVE message from peer".to_string()))?;

    Ok(index)
}

/// Apply a PIECE message to an assembly buffer.
///
/// The payload layout is `<index: u32><begin: u32><block>`. The block is
/// copied into `buf` at the `begin` offset after checking that the piece
/// index matches the piece being assembled and that the block fits inside
/// the buffer. Returns the number of block bytes copied.
///
/// # Arguments
///
/// * `index` - Index of the piece currently being assembled.
/// * `buf` - Assembly buffer sized to the full piece.
/// * `message` - The PIECE message received from the peer.
///
pub fn parse_piece(index: u32, buf: &mut [u8], message: &Message) -> Result<usize, Error> {
    if message.id != MESSAGE_PIECE || message.payload.len() < 8 {
        return Err(Error::PeerIo(
            "received invalid PIECE message from peer".to_string(),
        ));
    }

    let mut payload_cursor = Cursor::new(&message.payload[0..8]);
    let piece_index = payload_cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::PeerIo("received invalid PIECE message from peer".to_string()))?;
    let begin = payload_cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::PeerIo("received invalid PIECE message from peer".to_string()))?
        as usize;

    if piece_index != index {
        return Err(Error::PeerIo(format!(
            "expected block of piece #{index}, got piece #{piece_index}"
        )));
    }

    let block = &message.payload[8..];
    if begin + block.len() > buf.len() {
        return Err(Error::PeerIo(format!(
            "block at offset {begin} overflows piece #{index}"
        )));
    }

    buf[begin..begin + block.len()].copy_from_slice(block);

    Ok(block.len())
}
