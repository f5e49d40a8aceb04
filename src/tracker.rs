//! Tracker clients for peer discovery.
//!
//! The announce URL scheme picks the protocol: `http`/`https` trackers
//! speak a bencoded GET exchange, `udp` trackers the two-step binary
//! connect/announce exchange. Both hand back the same compact peer list.
//!
//! The UDP exchange is lossy by nature, so every receive runs under a read
//! deadline and requests are retransmitted with an exponentially growing
//! deadline before the tracker is declared unavailable.

use crate::error::Error;
use crate::peer::{self, Peer};
use crate::torrent::TorrentFile;

use byteorder::{BigEndian, ReadBytesExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::Url;

use std::io::{Cursor, ErrorKind};
use std::net::UdpSocket;
use std::time::Duration;

// HTTP announce timeout
const HTTP_TIMEOUT_SECS: u64 = 15;

// UDP tracker protocol magic and actions
const UDP_PROTOCOL_ID: u64 = 0x41727101980;
const UDP_ACTION_CONNECT: u32 = 0;
const UDP_ACTION_ANNOUNCE: u32 = 1;
const UDP_ACTION_ERROR: u32 = 3;

// Base read deadline per receive; doubles on every retransmission
const UDP_READ_TIMEOUT_SECS: u64 = 5;
const UDP_MAX_ATTEMPTS: u32 = 3;

/// Bencoded body of an HTTP tracker response.
#[derive(Debug, Deserialize, Serialize)]
struct BencodeTrackerResponse {
    // Seconds until the tracker wants to hear from us again
    interval: u32,
    // Compact peer list
    peers: ByteBuf,
}

/// Ask the torrent's tracker for an initial peer list.
///
/// # Arguments
///
/// * `torrent` - Metainfo carrying the announce URL and info-hash.
/// * `peer_id` - 20-byte identifier for this client.
/// * `port` - Port this client reports as listening on.
///
pub fn request_peers(torrent: &TorrentFile, peer_id: &[u8], port: u16) -> Result<Vec<Peer>, Error> {
    let announce = Url::parse(&torrent.announce)
        .map_err(|_| Error::TrackerUnavailable("could not parse announce url".to_string()))?;

    match announce.scheme() {
        "http" | "https" => request_peers_http(torrent, peer_id, port),
        "udp" => request_peers_udp(&announce, torrent, peer_id, port),
        scheme => Err(Error::TrackerUnavailable(format!(
            "unsupported announce scheme {scheme:?}"
        ))),
    }
}

fn request_peers_http(torrent: &TorrentFile, peer_id: &[u8], port: u16) -> Result<Vec<Peer>, Error> {
    let url = build_tracker_url(
        &torrent.announce,
        &torrent.info_hash,
        peer_id,
        port,
        torrent.length,
    );

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::TrackerUnavailable(format!("could not build http client: {e}")))?;

    let response = client
        .get(&url)
        .send()
        .map_err(|e| Error::TrackerUnavailable(format!("could not reach tracker: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::TrackerUnavailable(format!(
            "tracker answered with status {}",
            response.status()
        )));
    }

    let body = response
        .bytes()
        .map_err(|e| Error::TrackerUnavailable(format!("could not read tracker response: {e}")))?;

    let tracker = de::from_bytes::<BencodeTrackerResponse>(&body)
        .map_err(|e| Error::TrackerUnavailable(format!("could not decode tracker response: {e}")))?;

    debug!("tracker announce interval is {}s", tracker.interval);

    peer::parse_compact_peers(&tracker.peers)
}

/// Build an HTTP announce URL.
///
/// The info-hash and peer id are raw binary, so the query string is
/// assembled by hand with every byte percent-encoded.
fn build_tracker_url(announce: &str, info_hash: &[u8], peer_id: &[u8], port: u16, left: u64) -> String {
    // Each byte is encoded as %XX where XX is the hexadecimal representation
    fn percent_encode_binary(data: &[u8]) -> String {
        const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
        let mut encoded = String::with_capacity(data.len() * 3);

        for &byte in data {
            encoded.push('%');
            encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
        }

        encoded
    }

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}",
        percent_encode_binary(info_hash),
        percent_encode_binary(peer_id),
        port,
        left
    );

    let mut url = announce.to_string();
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    url
}

fn request_peers_udp(
    announce: &Url,
    torrent: &TorrentFile,
    peer_id: &[u8],
    port: u16,
) -> Result<Vec<Peer>, Error> {
    let addrs = announce
        .socket_addrs(|| None)
        .map_err(|e| Error::TrackerUnavailable(format!("could not resolve tracker host: {e}")))?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| Error::TrackerUnavailable(format!("could not bind udp socket: {e}")))?;
    socket
        .connect(addrs.as_slice())
        .map_err(|e| Error::TrackerUnavailable(format!("could not connect udp socket: {e}")))?;

    let mut rng = rand::thread_rng();

    // Step one: obtain a connection id
    let transaction_id: u32 = rng.gen();
    let request = build_connect_request(transaction_id);
    let response = exchange(&socket, &request, 16)?;
    let connection_id = parse_connect_response(&response, transaction_id)?;

    // Step two: announce and collect peers
    let transaction_id: u32 = rng.gen();
    let key: u32 = rng.gen();
    let request = build_announce_request(
        connection_id,
        transaction_id,
        &torrent.info_hash,
        peer_id,
        torrent.length,
        key,
        port,
    );
    let response = exchange(&socket, &request, 20)?;
    let compact = parse_announce_response(&response, transaction_id)?;

    peer::parse_compact_peers(&compact)
}

/// Send a request and wait for a response of at least `min_len` bytes,
/// retransmitting on read deadline expiry.
fn exchange(socket: &UdpSocket, request: &[u8], min_len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; 2048];

    for attempt in 0..UDP_MAX_ATTEMPTS {
        socket
            .send(request)
            .map_err(|e| Error::TrackerUnavailable(format!("could not send to tracker: {e}")))?;

        let deadline = Duration::from_secs(UDP_READ_TIMEOUT_SECS << attempt);
        socket
            .set_read_timeout(Some(deadline))
            .map_err(|e| Error::TrackerUnavailable(format!("could not set read deadline: {e}")))?;

        match socket.recv(&mut buf) {
            Ok(n) if n >= min_len => return Ok(buf[..n].to_vec()),
            Ok(n) => {
                return Err(Error::TrackerUnavailable(format!(
                    "tracker response of {n} bytes is too short"
                )))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                debug!("tracker read deadline expired, retransmitting (attempt {})", attempt + 1);
                continue;
            }
            Err(e) => {
                return Err(Error::TrackerUnavailable(format!(
                    "could not read tracker response: {e}"
                )))
            }
        }
    }

    Err(Error::TrackerUnavailable(
        "tracker did not respond".to_string(),
    ))
}

fn build_connect_request(transaction_id: u32) -> Vec<u8> {
    let mut request = Vec::with_capacity(16);
    request.extend_from_slice(&UDP_PROTOCOL_ID.to_be_bytes());
    request.extend_from_slice(&UDP_ACTION_CONNECT.to_be_bytes());
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request
}

fn parse_connect_response(response: &[u8], transaction_id: u32) -> Result<u64, Error> {
    let mut cursor = Cursor::new(response);
    let action = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated connect response".to_string()))?;
    let echoed_id = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated connect response".to_string()))?;

    if action != UDP_ACTION_CONNECT || echoed_id != transaction_id {
        return Err(Error::TrackerUnavailable(
            "connect response mismatch".to_string(),
        ));
    }

    cursor
        .read_u64::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated connect response".to_string()))
}

#[allow(clippy::too_many_arguments)]
fn build_announce_request(
    connection_id: u64,
    transaction_id: u32,
    info_hash: &[u8],
    peer_id: &[u8],
    left: u64,
    key: u32,
    port: u16,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(98);
    request.extend_from_slice(&connection_id.to_be_bytes());
    request.extend_from_slice(&UDP_ACTION_ANNOUNCE.to_be_bytes());
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request.extend_from_slice(info_hash);
    request.extend_from_slice(peer_id);
    request.extend_from_slice(&0u64.to_be_bytes()); // downloaded
    request.extend_from_slice(&left.to_be_bytes());
    request.extend_from_slice(&0u64.to_be_bytes()); // uploaded
    request.extend_from_slice(&0u32.to_be_bytes()); // event (none)
    request.extend_from_slice(&0u32.to_be_bytes()); // ip (default)
    request.extend_from_slice(&key.to_be_bytes());
    request.extend_from_slice(&(-1i32).to_be_bytes()); // num_want (default)
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Validate an announce response and return the compact peer bytes that
/// start at offset 20.
fn parse_announce_response(response: &[u8], transaction_id: u32) -> Result<Vec<u8>, Error> {
    let mut cursor = Cursor::new(response);
    let action = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated announce response".to_string()))?;
    let echoed_id = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated announce response".to_string()))?;

    if action == UDP_ACTION_ERROR {
        let reason = String::from_utf8_lossy(&response[8..]).to_string();
        return Err(Error::TrackerUnavailable(format!(
            "tracker reported an error: {reason}"
        )));
    }
    if action != UDP_ACTION_ANNOUNCE || echoed_id != transaction_id {
        return Err(Error::TrackerUnavailable(
            "announce response mismatch".to_string(),
        ));
    }

    let leechers = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated announce response".to_string()))?;
    let seeders = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::TrackerUnavailable("truncated announce response".to_string()))?;
    debug!("tracker reports {} leechers, {} seeders", leechers, seeders);

    Ok(response[20..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use std::thread;

    fn test_torrent(announce: String) -> TorrentFile {
        TorrentFile {
            announce,
            info_hash: vec![0x01; 20],
            piece_hashes: vec![vec![0x02; 20]],
            piece_length: 16384,
            length: 16384,
            name: "test".to_string(),
        }
    }

    #[test]
    fn tracker_url_carries_encoded_binary_params() {
        let url = build_tracker_url(
            "http://tracker.local/announce",
            &[0x01; 20],
            &[0xFF; 20],
            6881,
            20000,
        );

        assert!(url.starts_with("http://tracker.local/announce?"));
        assert!(url.contains(&format!("info_hash={}", "%01".repeat(20))));
        assert!(url.contains(&format!("peer_id={}", "%FF".repeat(20))));
        assert!(url.contains("port=6881"));
        assert!(url.contains("uploaded=0"));
        assert!(url.contains("downloaded=0"));
        assert!(url.contains("compact=1"));
        assert!(url.contains("left=20000"));
    }

    #[test]
    fn tracker_url_appends_to_existing_query() {
        let url = build_tracker_url("http://t.local/a?key=1", &[0; 20], &[0; 20], 1, 1);
        assert!(url.starts_with("http://t.local/a?key=1&info_hash="));
    }

    #[test]
    fn connect_request_layout() {
        let request = build_connect_request(0xDEADBEEF);

        assert_eq!(request.len(), 16);
        assert_eq!(&request[0..8], &UDP_PROTOCOL_ID.to_be_bytes());
        assert_eq!(&request[8..12], &0u32.to_be_bytes());
        assert_eq!(&request[12..16], &0xDEADBEEFu32.to_be_bytes());
    }

    #[test]
    fn connect_response_round_trip() {
        let mut response = vec![];
        response.extend_from_slice(&UDP_ACTION_CONNECT.to_be_bytes());
        response.extend_from_slice(&7u32.to_be_bytes());
        response.extend_from_slice(&0x1122334455667788u64.to_be_bytes());

        assert_eq!(parse_connect_response(&response, 7).unwrap(), 0x1122334455667788);
        assert!(parse_connect_response(&response, 8).is_err());
    }

    #[test]
    fn announce_request_layout() {
        let request = build_announce_request(42, 7, &[0xAA; 20], &[0xBB; 20], 1000, 9, 6881);

        assert_eq!(request.len(), 98);
        assert_eq!(&request[0..8], &42u64.to_be_bytes());
        assert_eq!(&request[8..12], &UDP_ACTION_ANNOUNCE.to_be_bytes());
        assert_eq!(&request[16..36], &[0xAA; 20][..]);
        assert_eq!(&request[36..56], &[0xBB; 20][..]);
        assert_eq!(&request[64..72], &1000u64.to_be_bytes());
        assert_eq!(&request[92..96], &(-1i32).to_be_bytes());
        assert_eq!(&request[96..98], &6881u16.to_be_bytes());
    }

    #[test]
    fn announce_response_yields_compact_peers() {
        let mut response = vec![];
        response.extend_from_slice(&UDP_ACTION_ANNOUNCE.to_be_bytes());
        response.extend_from_slice(&7u32.to_be_bytes());
        response.extend_from_slice(&1u32.to_be_bytes()); // leechers
        response.extend_from_slice(&2u32.to_be_bytes()); // seeders
        response.extend_from_slice(&0u32.to_be_bytes());
        response.extend_from_slice(&[10, 0, 0, 1, 0x1A, 0xE1]);

        let compact = parse_announce_response(&response, 7).unwrap();
        assert_eq!(compact, vec![10, 0, 0, 1, 0x1A, 0xE1]);
    }

    #[test]
    fn announce_response_surfaces_tracker_error() {
        let mut response = vec![];
        response.extend_from_slice(&UDP_ACTION_ERROR.to_be_bytes());
        response.extend_from_slice(&7u32.to_be_bytes());
        response.extend_from_slice(b"torrent not registered");
        // pad so the exchange length check would have passed
        response.resize(24, 0);

        let err = parse_announce_response(&response, 7).unwrap_err();
        assert!(err.to_string().contains("torrent not registered"));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let torrent = test_torrent("wss://tracker.local/announce".to_string());
        assert!(request_peers(&torrent, &[0; 20], 6881).is_err());
    }

    #[test]
    fn udp_tracker_two_step_exchange() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        thread::spawn(move || {
            let mut buf = [0u8; 1024];

            // Connect request
            let (n, from) = server.recv_from(&mut buf).unwrap();
            assert_eq!(n, 16);
            assert_eq!(&buf[0..8], &UDP_PROTOCOL_ID.to_be_bytes());
            let transaction_id = &buf[12..16].to_vec();

            let mut response = vec![];
            response.extend_from_slice(&UDP_ACTION_CONNECT.to_be_bytes());
            response.extend_from_slice(transaction_id);
            response.extend_from_slice(&0xABCDu64.to_be_bytes());
            server.send_to(&response, from).unwrap();

            // Announce request
            let (n, from) = server.recv_from(&mut buf).unwrap();
            assert_eq!(n, 98);
            assert_eq!(&buf[0..8], &0xABCDu64.to_be_bytes());
            let transaction_id = &buf[12..16].to_vec();

            let mut response = vec![];
            response.extend_from_slice(&UDP_ACTION_ANNOUNCE.to_be_bytes());
            response.extend_from_slice(transaction_id);
            response.extend_from_slice(&1u32.to_be_bytes());
            response.extend_from_slice(&1u32.to_be_bytes());
            response.extend_from_slice(&0u32.to_be_bytes());
            response.extend_from_slice(&[10, 0, 0, 1, 0x1A, 0xE1]);
            response.extend_from_slice(&[10, 0, 0, 2, 0x1A, 0xE2]);
            server.send_to(&response, from).unwrap();
        });

        let torrent = test_torrent(format!("udp://127.0.0.1:{}/announce", addr.port()));
        let peers = request_peers(&torrent, &[0x09; 20], 6881).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(peers[0].port, 6881);
        assert_eq!(peers[1].ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(peers[1].port, 6882);
    }
}
