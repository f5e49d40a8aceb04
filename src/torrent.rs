//! Torrent metainfo loading.
//!
//! A torrent descriptor is a bencoded dictionary. This engine supports
//! single-file torrents with the required keys:
//!
//! - **announce**: tracker URL for peer discovery
//! - **info.name**: suggested filename
//! - **info.length**: total file size in bytes
//! - **info.piece length**: size of each piece (uniform except the last)
//! - **info.pieces**: concatenated 20-byte SHA-1 piece hashes
//!
//! The info-hash that identifies the torrent on the network is the SHA-1 of
//! the canonically re-encoded `info` dictionary; bencode dictionaries are
//! sorted by key, so re-encoding the parsed struct reproduces the original
//! bytes. Torrents carrying a multi-file `files` key are rejected.

use crate::error::Error;

use boring::sha::Sha1;
use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser, value::Value};
use serde_bytes::ByteBuf;

use std::fs::File;
use std::io::Read;
use std::path::Path;

// Size of a SHA-1 hash in bytes
const SHA1_HASH_SIZE: usize = 20;

/// Metainfo of a single-file torrent, immutable after load.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    /// Tracker announce URL
    pub announce: String,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: Vec<u8>,
    /// One 20-byte SHA-1 hash per piece
    pub piece_hashes: Vec<Vec<u8>>,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u32,
    /// Total size of the file in bytes
    pub length: u64,
    /// Suggested filename from the torrent metadata
    pub name: String,
}

#[derive(Deserialize, Serialize)]
struct BencodeInfo {
    #[serde(rename = "pieces")]
    pieces: ByteBuf,
    #[serde(rename = "piece length")]
    piece_length: u32,
    #[serde(rename = "length", default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(rename = "name")]
    name: String,
    // Present only in multi-file torrents, which are unsupported
    #[serde(rename = "files", default, skip_serializing_if = "Option::is_none")]
    files: Option<Value>,
}

#[derive(Deserialize, Serialize)]
struct BencodeTorrent {
    #[serde(default)]
    announce: String,
    info: BencodeInfo,
}

impl BencodeInfo {
    /// Hash the re-encoded info dictionary to identify the torrent.
    fn hash(&self) -> Result<Vec<u8>, Error> {
        let buf: Vec<u8> = ser::to_bytes::<BencodeInfo>(self)
            .map_err(|e| Error::MetainfoInvalid(format!("could not encode info dictionary: {e}")))?;

        let mut hasher = Sha1::new();
        hasher.update(&buf);

        Ok(hasher.finish().to_vec())
    }

    /// Split the concatenated pieces blob into 20-byte hashes.
    fn split_piece_hashes(&self) -> Result<Vec<Vec<u8>>, Error> {
        let pieces = &self.pieces;

        if !pieces.len().is_multiple_of(SHA1_HASH_SIZE) {
            return Err(Error::MetainfoInvalid(format!(
                "malformed pieces blob of length {}",
                pieces.len()
            )));
        }

        let hashes = pieces
            .chunks(SHA1_HASH_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();

        Ok(hashes)
    }
}

impl BencodeTorrent {
    fn into_torrent_file(self) -> Result<TorrentFile, Error> {
        if self.announce.is_empty() {
            return Err(Error::MetainfoInvalid(
                "torrent has no announce url".to_string(),
            ));
        }
        if self.info.files.is_some() {
            return Err(Error::MetainfoInvalid(
                "multi-file torrents are not supported".to_string(),
            ));
        }

        let length = self
            .info
            .length
            .ok_or_else(|| Error::MetainfoInvalid("torrent has no length".to_string()))?;
        if self.info.piece_length == 0 {
            return Err(Error::MetainfoInvalid(
                "torrent has a zero piece length".to_string(),
            ));
        }

        let info_hash = self.info.hash()?;
        let piece_hashes = self.info.split_piece_hashes()?;

        // Every byte of the file must be covered by exactly one piece hash
        let expected_pieces = length.div_ceil(self.info.piece_length as u64);
        if expected_pieces != piece_hashes.len() as u64 {
            return Err(Error::MetainfoInvalid(format!(
                "expected {} piece hashes for {} bytes, found {}",
                expected_pieces,
                length,
                piece_hashes.len()
            )));
        }

        Ok(TorrentFile {
            announce: self.announce,
            info_hash,
            piece_hashes,
            piece_length: self.info.piece_length,
            length,
            name: self.info.name,
        })
    }
}

impl TorrentFile {
    /// Load a torrent descriptor from a file.
    pub fn open(filepath: &Path) -> Result<TorrentFile, Error> {
        let mut file = File::open(filepath)
            .map_err(|e| Error::MetainfoInvalid(format!("could not open torrent: {e}")))?;

        let mut buf = vec![];
        file.read_to_end(&mut buf)
            .map_err(|e| Error::MetainfoInvalid(format!("could not read torrent: {e}")))?;

        TorrentFile::from_bytes(&buf)
    }

    /// Parse a torrent descriptor from its raw bencoded bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<TorrentFile, Error> {
        let bencode = de::from_bytes::<BencodeTorrent>(buf)
            .map_err(|e| Error::MetainfoInvalid(format!("could not decode torrent: {e}")))?;

        bencode.into_torrent_file()
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Byte offset of a piece within the output file.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Exact size of a piece; only the final piece may be shorter than the
    /// nominal piece length.
    pub fn piece_size(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let mut end = begin + self.piece_length as u64;

        if end > self.length {
            end = self.length;
        }

        (end - begin) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Bencoded info dictionary with keys in canonical order.
    fn encode_info(length: u64, name: &str, piece_length: u32, pieces: &[u8]) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(b"d");
        buf.extend_from_slice(format!("6:lengthi{length}e").as_bytes());
        buf.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
        buf.extend_from_slice(format!("12:piece lengthi{piece_length}e").as_bytes());
        buf.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        buf.extend_from_slice(pieces);
        buf.extend_from_slice(b"e");
        buf
    }

    fn encode_torrent(announce: &str, info: &[u8]) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(b"d");
        buf.extend_from_slice(format!("8:announce{}:{}", announce.len(), announce).as_bytes());
        buf.extend_from_slice(b"4:info");
        buf.extend_from_slice(info);
        buf.extend_from_slice(b"e");
        buf
    }

    #[test]
    fn parses_single_file_torrent() {
        let pieces = vec![0xAB; 40];
        let info = encode_info(32, "test.bin", 16, &pieces);
        let raw = encode_torrent("http://tracker.local/announce", &info);

        let torrent = TorrentFile::from_bytes(&raw).unwrap();

        assert_eq!(torrent.announce, "http://tracker.local/announce");
        assert_eq!(torrent.name, "test.bin");
        assert_eq!(torrent.length, 32);
        assert_eq!(torrent.piece_length, 16);
        assert_eq!(torrent.piece_count(), 2);
        assert_eq!(torrent.piece_hashes[0], vec![0xAB; 20]);
    }

    #[test]
    fn info_hash_matches_canonical_encoding() {
        let pieces = vec![0x01; 20];
        let info = encode_info(10, "a", 16, &pieces);
        let raw = encode_torrent("http://t.example/", &info);

        let mut hasher = Sha1::new();
        hasher.update(&info);
        let expected = hasher.finish().to_vec();

        let torrent = TorrentFile::from_bytes(&raw).unwrap();
        assert_eq!(torrent.info_hash, expected);
    }

    #[test]
    fn tail_piece_is_shorter() {
        let pieces = vec![0x00; 40];
        let info = encode_info(20, "tail", 16, &pieces);
        let raw = encode_torrent("http://t.example/", &info);

        let torrent = TorrentFile::from_bytes(&raw).unwrap();

        assert_eq!(torrent.piece_size(0), 16);
        assert_eq!(torrent.piece_size(1), 4);
        assert_eq!(torrent.piece_offset(1), 16);
    }

    #[test]
    fn rejects_multi_file_torrent() {
        let mut info = vec![];
        info.extend_from_slice(b"d");
        info.extend_from_slice(b"5:filesld6:lengthi5e4:pathl3:fooeee");
        info.extend_from_slice(b"4:name4:test");
        info.extend_from_slice(b"12:piece lengthi16e");
        info.extend_from_slice(b"6:pieces20:");
        info.extend_from_slice(&[0x00; 20]);
        info.extend_from_slice(b"e");
        let raw = encode_torrent("http://t.example/", &info);

        let err = TorrentFile::from_bytes(&raw).unwrap_err();
        assert!(err.to_string().contains("multi-file"));
    }

    #[test]
    fn rejects_misaligned_pieces_blob() {
        let pieces = vec![0x00; 21];
        let info = encode_info(16, "bad", 16, &pieces);
        let raw = encode_torrent("http://t.example/", &info);

        assert!(TorrentFile::from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_piece_count_mismatch() {
        // 64 bytes at piece length 16 needs 4 hashes, not 2
        let pieces = vec![0x00; 40];
        let info = encode_info(64, "short", 16, &pieces);
        let raw = encode_torrent("http://t.example/", &info);

        assert!(TorrentFile::from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(TorrentFile::from_bytes(b"not a torrent").is_err());
    }
}
