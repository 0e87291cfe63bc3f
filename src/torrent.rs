use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use crate::bencode;
use crate::error::{Error, Result};

pub const HASH_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
struct Metainfo {
    announce: String,
    info: Info,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Info {
    pub length: u64,
    pub name: String,
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    pub pieces: ByteBuf,
}

/// A parsed single-file `.torrent`. The info hash is the SHA-1 of the
/// `info` value's bytes as they appeared in the source document, not of
/// a re-encoding, so torrents that were not written canonically still
/// hash to what the tracker expects.
#[derive(Debug)]
pub struct Torrent {
    pub announce: String,
    pub info: Info,
    pub info_hash: [u8; HASH_SIZE],
}

impl Torrent {
    pub fn from_bytes(raw: &[u8]) -> Result<Torrent> {
        let metainfo: Metainfo = bencode::from_bytes(raw)?;
        let span = bencode::dict_value_span(raw, b"info")?;
        let info_hash = Sha1::digest(&raw[span]).into();

        let torrent = Torrent {
            announce: metainfo.announce,
            info: metainfo.info,
            info_hash,
        };
        torrent.validate()?;
        Ok(torrent)
    }

    fn validate(&self) -> Result<()> {
        if self.info.length == 0 {
            return Err(Error::InvalidMetainfo("length must be positive"));
        }
        if self.info.piece_length == 0 {
            return Err(Error::InvalidMetainfo("piece length must be positive"));
        }
        let expected = self.info.length.div_ceil(self.info.piece_length) as usize * HASH_SIZE;
        if self.info.pieces.len() != expected {
            return Err(Error::InvalidMetainfo(
                "pieces does not hold one hash per piece",
            ));
        }
        Ok(())
    }

    pub fn total_pieces(&self) -> u32 {
        self.info.length.div_ceil(self.info.piece_length) as u32
    }

    /// Piece size in bytes; only the last piece may fall short.
    pub fn piece_length_at(&self, index: u32) -> u32 {
        let begin = u64::from(index) * self.info.piece_length;
        let end = (begin + self.info.piece_length).min(self.info.length);
        (end - begin) as u32
    }

    pub fn piece_hash(&self, index: u32) -> [u8; HASH_SIZE] {
        let at = index as usize * HASH_SIZE;
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&self.info.pieces[at..at + HASH_SIZE]);
        hash
    }
}

////////////////////////////////////////////////////////////////////////////////
