use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::peer::{Peer, PeerConn};
use crate::torrent::Torrent;
use crate::worker::{PieceOutcome, PieceWork, Worker, MAX_RETRIES};

pub const DEFAULT_CONCURRENCY: usize = 3;

/// Download the whole file across up to `concurrency` peers and return
/// the reassembled bytes.
pub async fn download(
    torrent: &Torrent,
    peers: &[Peer],
    concurrency: usize,
    peer_id: [u8; 20],
) -> Result<Vec<u8>> {
    let pending = (0..torrent.total_pieces())
        .map(|index| piece_work(torrent, index))
        .collect();
    let pieces = run_swarm(torrent, peers, concurrency, pending, peer_id).await?;

    let mut file = vec![0u8; torrent.info.length as usize];
    for (index, data) in pieces {
        let begin = index as usize * torrent.info.piece_length as usize;
        file[begin..begin + data.len()].copy_from_slice(&data);
    }
    Ok(file)
}

/// Download a single piece; the `download_piece` sub-command.
pub async fn fetch_piece(
    torrent: &Torrent,
    peers: &[Peer],
    index: u32,
    peer_id: [u8; 20],
) -> Result<Vec<u8>> {
    let pending = vec![piece_work(torrent, index)];
    let mut pieces = run_swarm(torrent, peers, DEFAULT_CONCURRENCY, pending, peer_id).await?;
    let (_, data) = pieces.pop().ok_or(Error::DownloadFailed(index))?;
    Ok(data)
}

fn piece_work(torrent: &Torrent, index: u32) -> PieceWork {
    PieceWork {
        index,
        length: torrent.piece_length_at(index),
        hash: torrent.piece_hash(index),
        attempt: 1,
    }
}

/// One worker per surviving peer, all feeding from a shared work queue
/// and reporting into a result channel. Pieces complete in whatever
/// order the swarm serves them.
async fn run_swarm(
    torrent: &Torrent,
    peers: &[Peer],
    concurrency: usize,
    pending: Vec<PieceWork>,
    peer_id: [u8; 20],
) -> Result<Vec<(u32, Vec<u8>)>> {
    let sessions = connect_swarm(torrent.info_hash, peers, concurrency, peer_id).await?;
    info!(
        workers = sessions.len(),
        pieces = pending.len(),
        "starting download"
    );

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    let work_rx: Arc<Mutex<_>> = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();

    let mut remaining = pending.len();
    for work in pending {
        let _ = work_tx.send(work);
    }

    let handles: Vec<JoinHandle<()>> = sessions
        .into_iter()
        .map(|conn| {
            let worker = Worker::new(conn, Arc::clone(&work_rx), result_tx.clone());
            tokio::spawn(worker.run())
        })
        .collect();
    drop(result_tx);

    let mut done = Vec::with_capacity(remaining);
    while remaining > 0 {
        let Some(outcome) = result_rx.recv().await else {
            // Every worker died with pieces still outstanding.
            return Err(Error::NoUsablePeers);
        };
        match outcome {
            PieceOutcome::Verified { index, data } => {
                remaining -= 1;
                debug!(piece = index, remaining, "piece collected");
                done.push((index, data));
            }
            PieceOutcome::Returned(work) => {
                let _ = work_tx.send(work);
            }
            PieceOutcome::Errored(mut work) => {
                work.attempt += 1;
                if work.attempt > MAX_RETRIES {
                    warn!(piece = work.index, "piece exhausted its retries");
                    return Err(Error::DownloadFailed(work.index));
                }
                debug!(piece = work.index, attempt = work.attempt, "requeueing piece");
                let _ = work_tx.send(work);
            }
        }
    }

    // Closing the work channel drains the idle workers out.
    drop(work_tx);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(done)
}

/// Dial up to `concurrency` peers in parallel. A peer joins the swarm
/// only if the dial, the handshake and the first-message read all
/// succeed; the rest are dropped with a log line.
async fn connect_swarm(
    info_hash: [u8; 20],
    peers: &[Peer],
    concurrency: usize,
    peer_id: [u8; 20],
) -> Result<Vec<PeerConn>> {
    let attempts: Vec<JoinHandle<Result<PeerConn>>> = peers
        .iter()
        .copied()
        .take(concurrency)
        .map(|peer| {
            tokio::spawn(async move {
                let mut conn = peer.connect(info_hash, peer_id).await?;
                conn.read_bitfield().await?;
                Ok(conn)
            })
        })
        .collect();

    let mut sessions = Vec::new();
    for attempt in attempts {
        match attempt.await {
            Ok(Ok(conn)) => sessions.push(conn),
            Ok(Err(err)) => debug!(%err, "discarding peer"),
            Err(err) => debug!(%err, "dial task failed"),
        }
    }
    if sessions.is_empty() {
        return Err(Error::NoUsablePeers);
    }
    Ok(sessions)
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use sha1::{Digest, Sha1};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::bencode;
    use crate::peer::{generate_peer_id, Handshake, PeerMessage};
    use crate::torrent::Info;

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn make_torrent(data: &[u8], piece_length: u64, announce: &str) -> Torrent {
        let mut pieces = Vec::new();
        for chunk in data.chunks(piece_length as usize) {
            pieces.extend_from_slice(&Sha1::digest(chunk));
        }
        let info = Info {
            length: data.len() as u64,
            name: "sample.bin".to_string(),
            piece_length,
            pieces: serde_bytes::ByteBuf::from(pieces),
        };
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce");
        doc.extend_from_slice(format!("{}:{announce}", announce.len()).as_bytes());
        doc.extend_from_slice(b"4:info");
        doc.extend_from_slice(&bencode::to_bytes(&info).unwrap());
        doc.push(b'e');
        Torrent::from_bytes(&doc).unwrap()
    }

    struct StubPeer {
        data: Vec<u8>,
        piece_length: usize,
        /// Close the connection after serving this many blocks.
        fail_after: Option<usize>,
        /// Serve zeroed blocks so every hash check fails.
        corrupt: bool,
    }

    impl StubPeer {
        fn good(data: Vec<u8>, piece_length: usize) -> Self {
            Self {
                data,
                piece_length,
                fail_after: None,
                corrupt: false,
            }
        }

        async fn spawn(self) -> SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut served = 0usize;
                let mut buf = [0u8; 68];
                if socket.read_exact(&mut buf).await.is_err() {
                    return;
                }
                // Echo the caller's info hash back, whatever it is.
                let theirs = Handshake::from_bytes(&buf).unwrap();
                let reply = Handshake::new(theirs.info_hash, *b"-ST0001-abcdefghijkl");
                let _ = socket.write_all(&reply.to_bytes()).await;
                let _ = socket
                    .write_all(&PeerMessage::Bitfield(vec![0xff]).to_bytes())
                    .await;

                loop {
                    let mut len_buf = [0u8; 4];
                    if socket.read_exact(&mut len_buf).await.is_err() {
                        return;
                    }
                    let len = u32::from_be_bytes(len_buf) as usize;
                    if len == 0 {
                        continue;
                    }
                    let mut frame = vec![0u8; len];
                    if socket.read_exact(&mut frame).await.is_err() {
                        return;
                    }
                    match PeerMessage::from_frame(&frame).unwrap() {
                        PeerMessage::Interested => {
                            let _ = socket.write_all(&PeerMessage::Unchoke.to_bytes()).await;
                        }
                        PeerMessage::Request {
                            index,
                            begin,
                            length,
                        } => {
                            if self.fail_after.is_some_and(|limit| served >= limit) {
                                return;
                            }
                            served += 1;
                            let start = index as usize * self.piece_length + begin as usize;
                            let block = if self.corrupt {
                                vec![0u8; length as usize]
                            } else {
                                self.data[start..start + length as usize].to_vec()
                            };
                            let piece = PeerMessage::Piece {
                                index,
                                begin,
                                block,
                            };
                            let _ = socket.write_all(&piece.to_bytes()).await;
                        }
                        _ => {}
                    }
                }
            });
            addr
        }
    }

    fn peer_at(addr: SocketAddr) -> Peer {
        Peer::new([127, 0, 0, 1], addr.port())
    }

    #[tokio::test]
    async fn test_download_reassembles_across_swarm() {
        // Three pieces, two blocks each except the short tail. One of
        // the two peers dies mid-piece; its piece must be retried on
        // the survivor.
        let piece_length = 2 * 16384usize;
        let data = sample_data(2 * piece_length + 1000);
        let torrent = make_torrent(&data, piece_length as u64, "http://unused/announce");

        let good = StubPeer::good(data.clone(), piece_length).spawn().await;
        let flaky = StubPeer {
            data: data.clone(),
            piece_length,
            fail_after: Some(1),
            corrupt: false,
        }
        .spawn()
        .await;

        let peers = [peer_at(flaky), peer_at(good)];
        let file = download(&torrent, &peers, 2, generate_peer_id())
            .await
            .unwrap();
        assert_eq!(file, data);
    }

    #[tokio::test]
    async fn test_fetch_piece_verifies_hash() {
        let piece_length = 16384usize;
        let data = sample_data(piece_length + 600);
        let torrent = make_torrent(&data, piece_length as u64, "http://unused/announce");

        let addr = StubPeer::good(data.clone(), piece_length).spawn().await;
        let piece = fetch_piece(&torrent, &[peer_at(addr)], 1, generate_peer_id())
            .await
            .unwrap();
        assert_eq!(piece, &data[piece_length..]);
    }

    #[tokio::test]
    async fn test_corrupt_swarm_exhausts_retries() {
        let data = sample_data(1024);
        let torrent = make_torrent(&data, 1024, "http://unused/announce");

        let corrupt = StubPeer {
            data,
            piece_length: 1024,
            fail_after: None,
            corrupt: true,
        }
        .spawn()
        .await;

        let result = download(&torrent, &[peer_at(corrupt)], 1, generate_peer_id()).await;
        assert!(matches!(result, Err(Error::DownloadFailed(0))));
    }

    #[tokio::test]
    async fn test_unreachable_swarm_is_unusable() {
        let data = sample_data(512);
        let torrent = make_torrent(&data, 512, "http://unused/announce");

        // Grab a port and close it again so the dial is refused.
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = download(&torrent, &[peer_at(dead)], 3, generate_peer_id()).await;
        assert!(matches!(result, Err(Error::NoUsablePeers)));
    }
}
