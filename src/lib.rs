#![warn(clippy::pedantic)]

pub mod bencode;
pub mod bitfield;
pub mod download;
pub mod error;
pub mod peer;
pub mod torrent;
pub mod tracker;
pub mod worker;

pub use error::{Error, Result};
