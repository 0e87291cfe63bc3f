use std::sync::Arc;

use sha1::{Digest, Sha1};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::peer::{PeerConn, PeerMessage};
use crate::torrent::HASH_SIZE;

pub const BLOCK_SIZE: u32 = 16 * 1024;
/// Outstanding Request messages kept on the wire per peer.
pub const PIPELINE_DEPTH: u32 = 5;
/// Attempts per piece before the download is declared lost.
pub const MAX_RETRIES: u32 = 3;

/// The work channel receiver, shared by every worker. Whoever holds
/// the lock takes the next piece; ownership of a piece moves by
/// channel send and receive, never by sharing.
pub type WorkQueue = Arc<Mutex<UnboundedReceiver<PieceWork>>>;

#[derive(Debug, Clone)]
pub struct PieceWork {
    pub index: u32,
    pub length: u32,
    pub hash: [u8; HASH_SIZE],
    pub attempt: u32,
}

#[derive(Debug)]
pub enum PieceOutcome {
    /// Hash checked out; bytes ready for the file buffer.
    Verified { index: u32, data: Vec<u8> },
    /// This peer does not have the piece; hand it to another worker.
    Returned(PieceWork),
    /// The attempt failed; the coordinator decides whether to requeue.
    Errored(PieceWork),
}

/// Drives one peer connection: declares interest, rides out choking,
/// and pulls pieces off the shared queue until it closes.
pub struct Worker {
    conn: PeerConn,
    work: WorkQueue,
    results: UnboundedSender<PieceOutcome>,
}

impl Worker {
    pub fn new(conn: PeerConn, work: WorkQueue, results: UnboundedSender<PieceOutcome>) -> Self {
        Self {
            conn,
            work,
            results,
        }
    }

    pub async fn run(mut self) {
        let peer = self.conn.peer;
        if let Err(err) = self.conn.send(&PeerMessage::Interested).await {
            debug!(%peer, %err, "could not declare interest");
            return;
        }

        loop {
            let Some(work) = self.next_work().await else {
                debug!(%peer, "work channel closed, worker exiting");
                return;
            };

            if !self.conn.has_piece(work.index) {
                trace!(%peer, piece = work.index, "peer lacks piece");
                if self.results.send(PieceOutcome::Returned(work)).is_err() {
                    return;
                }
                continue;
            }

            match self.fetch_piece(&work).await {
                Ok(data) => {
                    debug!(%peer, piece = work.index, "piece verified");
                    let verified = PieceOutcome::Verified {
                        index: work.index,
                        data,
                    };
                    if self.results.send(verified).is_err() {
                        return;
                    }
                }
                // A bad hash condemns the attempt, not the connection.
                Err(Error::HashMismatch(index)) => {
                    warn!(%peer, piece = index, "piece failed verification");
                    if self.results.send(PieceOutcome::Errored(work)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(%peer, piece = work.index, %err, "dropping peer");
                    let _ = self.results.send(PieceOutcome::Errored(work));
                    return;
                }
            }
        }
    }

    async fn next_work(&self) -> Option<PieceWork> {
        self.work.lock().await.recv().await
    }

    /// Download one piece with up to [`PIPELINE_DEPTH`] requests in
    /// flight. Blocks land at their `begin` offset, whatever order the
    /// peer serves them in.
    async fn fetch_piece(&mut self, work: &PieceWork) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; work.length as usize];
        let mut downloaded: u32 = 0;
        let mut requested: u32 = 0;
        let mut inflight: u32 = 0;

        while downloaded < work.length {
            if !self.conn.choked {
                while inflight < PIPELINE_DEPTH && requested < work.length {
                    let length = BLOCK_SIZE.min(work.length - requested);
                    let request = PeerMessage::Request {
                        index: work.index,
                        begin: requested,
                        length,
                    };
                    self.conn.send(&request).await?;
                    requested += length;
                    inflight += 1;
                }
            }

            match self.conn.recv().await? {
                PeerMessage::Choke => self.conn.choked = true,
                PeerMessage::Unchoke => self.conn.choked = false,
                PeerMessage::Have(index) => self.conn.bitfield.set(index),
                PeerMessage::Piece {
                    index,
                    begin,
                    block,
                } => {
                    if index != work.index {
                        return Err(Error::Protocol(format!(
                            "got a block of piece {index} while downloading piece {}",
                            work.index
                        )));
                    }
                    if block.len() as u32 > BLOCK_SIZE {
                        return Err(Error::Protocol(format!(
                            "oversize block of {} bytes",
                            block.len()
                        )));
                    }
                    let begin = begin as usize;
                    let end = begin
                        .checked_add(block.len())
                        .filter(|&end| end <= buf.len())
                        .ok_or_else(|| {
                            Error::Protocol("block outside piece bounds".to_string())
                        })?;
                    buf[begin..end].copy_from_slice(&block);
                    downloaded += block.len() as u32;
                    inflight = inflight.saturating_sub(1);
                    trace!(piece = work.index, begin, downloaded, "block stored");
                }
                PeerMessage::KeepAlive => {}
                other => trace!(?other, "ignoring message"),
            }
        }

        let digest: [u8; HASH_SIZE] = Sha1::digest(&buf).into();
        if digest != work.hash {
            return Err(Error::HashMismatch(work.index));
        }
        Ok(buf)
    }
}
