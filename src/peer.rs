use std::fmt::{self, Display};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::bitfield::Bitfield;
use crate::error::{Error, Result};

/// Largest frame a peer may send: one 16 KiB block plus the Piece
/// header, rounded up. Anything bigger is a misbehaving peer.
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024;
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
const HANDSHAKE_LEN: usize = 68;

pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    rand::thread_rng().fill(&mut id[..]);
    id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn new(octets: [u8; 4], port: u16) -> Self {
        Self {
            ip: Ipv4Addr::from(octets),
            port,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Dial and exchange handshakes. The returned session starts out
    /// choked with an all-zero bitfield.
    pub async fn connect(self, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<PeerConn> {
        let addr = self.addr();
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::DialTimeout(addr))??;
        PeerConn::handshake(stream, self, info_hash, peer_id).await
    }
}

impl From<SocketAddrV4> for Peer {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        // bytes 20..28 are the reserved field, left zero
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn from_bytes(buf: &[u8; HANDSHAKE_LEN]) -> Result<Self> {
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL {
            return Err(Error::HandshakeMismatch);
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { info_hash, peer_id })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
    /// Ids this client does not speak are read and dropped.
    Unknown(u8),
}

impl PeerMessage {
    /// Length-prefixed wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => payload.push(0),
            PeerMessage::Unchoke => payload.push(1),
            PeerMessage::Interested => payload.push(2),
            PeerMessage::NotInterested => payload.push(3),
            PeerMessage::Have(index) => {
                payload.push(4);
                payload.extend(index.to_be_bytes());
            }
            PeerMessage::Bitfield(bits) => {
                payload.push(5);
                payload.extend(bits);
            }
            PeerMessage::Request {
                index,
                begin,
                length,
            } => {
                payload.push(6);
                payload.extend(index.to_be_bytes());
                payload.extend(begin.to_be_bytes());
                payload.extend(length.to_be_bytes());
            }
            PeerMessage::Piece {
                index,
                begin,
                block,
            } => {
                payload.push(7);
                payload.extend(index.to_be_bytes());
                payload.extend(begin.to_be_bytes());
                payload.extend(block);
            }
            PeerMessage::Cancel {
                index,
                begin,
                length,
            } => {
                payload.push(8);
                payload.extend(index.to_be_bytes());
                payload.extend(begin.to_be_bytes());
                payload.extend(length.to_be_bytes());
            }
            PeerMessage::Unknown(id) => payload.push(*id),
        }

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend((payload.len() as u32).to_be_bytes());
        frame.extend(payload);
        frame
    }

    /// Parse a frame body (message id plus payload, length prefix
    /// already stripped). Empty frames are keep-alives.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let Some((&id, payload)) = frame.split_first() else {
            return Ok(PeerMessage::KeepAlive);
        };
        let message = match id {
            0 => PeerMessage::Choke,
            1 => PeerMessage::Unchoke,
            2 => PeerMessage::Interested,
            3 => PeerMessage::NotInterested,
            4 => PeerMessage::Have(read_u32(payload, 0)?),
            5 => PeerMessage::Bitfield(payload.to_vec()),
            6 => PeerMessage::Request {
                index: read_u32(payload, 0)?,
                begin: read_u32(payload, 4)?,
                length: read_u32(payload, 8)?,
            },
            7 => {
                if payload.len() < 8 {
                    return Err(Error::Protocol("truncated piece message".to_string()));
                }
                PeerMessage::Piece {
                    index: read_u32(payload, 0)?,
                    begin: read_u32(payload, 4)?,
                    block: payload[8..].to_vec(),
                }
            }
            8 => PeerMessage::Cancel {
                index: read_u32(payload, 0)?,
                begin: read_u32(payload, 4)?,
                length: read_u32(payload, 8)?,
            },
            id => PeerMessage::Unknown(id),
        };
        Ok(message)
    }
}

fn read_u32(payload: &[u8], at: usize) -> Result<u32> {
    payload
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::Protocol("truncated message payload".to_string()))
}

/// One live peer-wire session.
pub struct PeerConn {
    stream: TcpStream,
    pub peer: Peer,
    pub peer_id: [u8; 20],
    pub bitfield: Bitfield,
    pub choked: bool,
}

impl PeerConn {
    async fn handshake(
        mut stream: TcpStream,
        peer: Peer,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<Self> {
        stream
            .write_all(&Handshake::new(info_hash, peer_id).to_bytes())
            .await?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        timeout(READ_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout)??;
        let remote = Handshake::from_bytes(&buf)?;
        if remote.info_hash != info_hash {
            return Err(Error::HandshakeMismatch);
        }
        trace!(%peer, peer_id = %hex::encode(remote.peer_id), "handshake complete");

        Ok(Self {
            stream,
            peer,
            peer_id: remote.peer_id,
            bitfield: Bitfield::default(),
            choked: true,
        })
    }

    pub async fn send(&mut self, message: &PeerMessage) -> Result<()> {
        self.stream.write_all(&message.to_bytes()).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<PeerMessage> {
        let mut len_buf = [0u8; 4];
        timeout(READ_TIMEOUT, self.stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| Error::ReadTimeout)??;
        let len = u32::from_be_bytes(len_buf);
        if len == 0 {
            return Ok(PeerMessage::KeepAlive);
        }
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(len));
        }

        let mut frame = vec![0u8; len as usize];
        timeout(READ_TIMEOUT, self.stream.read_exact(&mut frame))
            .await
            .map_err(|_| Error::ReadTimeout)??;
        PeerMessage::from_frame(&frame)
    }

    /// Handle the first post-handshake message. Peers usually announce
    /// their pieces here; one that does not is left with an all-zero
    /// bitfield.
    pub async fn read_bitfield(&mut self) -> Result<()> {
        match self.recv().await? {
            PeerMessage::Bitfield(bits) => self.bitfield = Bitfield::from(bits),
            PeerMessage::Have(index) => self.bitfield.set(index),
            other => trace!(peer = %self.peer, ?other, "peer sent no bitfield"),
        }
        Ok(())
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has(index)
    }
}

////////////////////////////////////////////////////////////////////////////////
