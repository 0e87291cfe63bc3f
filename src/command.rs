use std::fs;
use std::net::SocketAddrV4;

use anyhow::{anyhow, Context, Result};
use btget::peer::{generate_peer_id, Peer};
use btget::torrent::{Torrent, HASH_SIZE};
use btget::{bencode, download, tracker};

pub fn decode(value: &str) -> Result<()> {
    let value = bencode::decode(value.as_bytes())?;
    println!("{value}");
    Ok(())
}

pub fn info(torrent_file: &str) -> Result<()> {
    let torrent = load_torrent(torrent_file)?;

    println!("Tracker URL: {}", torrent.announce);
    println!("Length: {}", torrent.info.length);
    println!("Info Hash: {}", hex::encode(torrent.info_hash));
    println!("Piece Length: {}", torrent.info.piece_length);
    println!("Piece Hashes:");
    for hash in torrent.info.pieces.chunks(HASH_SIZE) {
        println!("{}", hex::encode(hash));
    }

    Ok(())
}

pub async fn peers(torrent_file: &str) -> Result<()> {
    let torrent = load_torrent(torrent_file)?;
    let peers = tracker::announce(&torrent, &generate_peer_id()).await?;
    for peer in peers {
        println!("{peer}");
    }

    Ok(())
}

pub async fn handshake(torrent_file: &str, peer: Option<&str>) -> Result<()> {
    let torrent = load_torrent(torrent_file)?;
    let peer_id = generate_peer_id();

    let peer = match peer {
        Some(addr) => {
            let addr: SocketAddrV4 = addr
                .parse()
                .with_context(|| format!("invalid peer address `{addr}`"))?;
            Peer::from(addr)
        }
        None => {
            let peers = tracker::announce(&torrent, &peer_id).await?;
            *peers.first().ok_or_else(|| anyhow!("no peers to dial"))?
        }
    };

    let conn = peer.connect(torrent.info_hash, peer_id).await?;
    println!("Peer ID: {}", hex::encode(conn.peer_id));

    Ok(())
}

pub async fn download_piece(output_file: &str, torrent_file: &str, piece_index: u32) -> Result<()> {
    let torrent = load_torrent(torrent_file)?;
    if piece_index >= torrent.total_pieces() {
        return Err(anyhow!(
            "piece {piece_index} out of range, torrent has {} pieces",
            torrent.total_pieces()
        ));
    }
    let peer_id = generate_peer_id();
    let peers = tracker::announce(&torrent, &peer_id).await?;

    let piece = download::fetch_piece(&torrent, &peers, piece_index, peer_id).await?;
    fs::write(output_file, piece)?;
    println!("Piece {piece_index} downloaded to {output_file}.");

    Ok(())
}

pub async fn download(output_file: &str, torrent_file: &str, concurrency: usize) -> Result<()> {
    let torrent = load_torrent(torrent_file)?;
    let peer_id = generate_peer_id();
    let peers = tracker::announce(&torrent, &peer_id).await?;

    let data = download::download(&torrent, &peers, concurrency, peer_id).await?;
    fs::write(output_file, data)?;
    println!("Downloaded {torrent_file} to {output_file}.");

    Ok(())
}

fn load_torrent(torrent_file: &str) -> Result<Torrent> {
    let raw = fs::read(torrent_file)
        .with_context(|| format!("could not read torrent file `{torrent_file}`"))?;
    Ok(Torrent::from_bytes(&raw)?)
}
