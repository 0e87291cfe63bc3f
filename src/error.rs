use std::net::SocketAddr;

use thiserror::Error;

use crate::bencode;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a `.torrent` file and a
/// verified download. Workers translate transport and protocol errors
/// into a requeue; only a piece that keeps failing surfaces here as
/// [`Error::DownloadFailed`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed bencode: {0}")]
    Bencode(#[from] bencode::Error),
    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(&'static str),
    #[error("tracker responded with HTTP {0}")]
    TrackerHttp(u16),
    #[error("tracker unreachable: {0}")]
    TrackerUnreachable(#[from] reqwest::Error),
    #[error("tracker returned no peers")]
    NoPeers,
    #[error("no usable peers in the swarm")]
    NoUsablePeers,
    #[error("timed out dialing {0}")]
    DialTimeout(SocketAddr),
    #[error("peer handshake mismatch")]
    HandshakeMismatch,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("peer message of {0} bytes exceeds the frame cap")]
    MessageTooLarge(u32),
    #[error("timed out waiting for a peer message")]
    ReadTimeout,
    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),
    #[error("piece {0} failed on every attempt")]
    DownloadFailed(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
