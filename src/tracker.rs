use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_bytes::ByteBuf;
use tracing::debug;

use crate::bencode;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::torrent::Torrent;

const LISTEN_PORT: u16 = 6881;

#[derive(Debug)]
struct AnnounceRequest<'a> {
    info_hash: &'a [u8; 20],
    peer_id: &'a [u8; 20],
    port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    compact: u8,
}

impl<'a> AnnounceRequest<'a> {
    fn new(torrent: &'a Torrent, peer_id: &'a [u8; 20]) -> Self {
        Self {
            info_hash: &torrent.info_hash,
            peer_id,
            port: LISTEN_PORT,
            uploaded: 0,
            downloaded: 0,
            left: torrent.info.length,
            compact: 1,
        }
    }

    fn to_url(&self, announce: &str) -> String {
        format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            announce,
            percent_encode(self.info_hash),
            percent_encode(self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
            self.compact
        )
    }
}

#[derive(Debug, Deserialize)]
struct AnnounceResponse {
    #[serde(default)]
    interval: u64,
    peers: ByteBuf,
}

/// Announce to the torrent's tracker and return the swarm it reports.
/// An empty swarm surfaces as [`Error::NoPeers`].
pub async fn announce(torrent: &Torrent, peer_id: &[u8; 20]) -> Result<Vec<Peer>> {
    let url = AnnounceRequest::new(torrent, peer_id).to_url(&torrent.announce);
    debug!(%url, "announcing to tracker");

    let response = Client::new().get(&url).send().await?;
    if response.status() != StatusCode::OK {
        return Err(Error::TrackerHttp(response.status().as_u16()));
    }
    let body = response.bytes().await?;
    let response: AnnounceResponse = bencode::from_bytes(&body)?;
    debug!(interval = response.interval, "tracker answered");

    let peers = parse_compact_peers(&response.peers)?;
    if peers.is_empty() {
        return Err(Error::NoPeers);
    }
    Ok(peers)
}

fn parse_compact_peers(raw: &[u8]) -> Result<Vec<Peer>> {
    if raw.len() % 6 != 0 {
        return Err(Error::Protocol(
            "compact peer list length is not a multiple of 6".to_string(),
        ));
    }
    Ok(raw
        .chunks(6)
        .map(|entry| {
            Peer::new(
                [entry[0], entry[1], entry[2], entry[3]],
                u16::from_be_bytes([entry[4], entry[5]]),
            )
        })
        .collect())
}

fn percent_encode(input: &[u8]) -> String {
    let mut output = String::with_capacity(input.len() * 3);
    for &byte in input {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                output.push(byte as char);
            }
            byte => {
                output.push('%');
                output.push(hex_char(byte >> 4));
                output.push(hex_char(byte & 0x0F));
            }
        }
    }
    output
}

fn hex_char(nibble: u8) -> char {
    match nibble {
        0..=9 => (nibble + b'0') as char,
        10..=15 => (nibble - 10 + b'A') as char,
        _ => unreachable!(),
    }
}

////////////////////////////////////////////////////////////////////////////////
