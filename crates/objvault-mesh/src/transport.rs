//! Message transport abstraction
//!
//! The overlay talks to a fixed set of peers, identified by rank, through a
//! tagged point-to-point substrate. The substrate guarantees FIFO delivery
//! per (source, tag) pair; across sources or tags there is no ordering.
//!
//! `probe` is filtered by a tag set so an overlay can share the transport
//! with unrelated host traffic: it only ever sees (and consumes) its own
//! tags.

use crate::message::Tag;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use objvault_common::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Peer identifier, dense in `0..size`.
pub type Rank = usize;

/// Tagged point-to-point message substrate.
pub trait Communicator: Send + Sync {
    /// This node's rank.
    fn rank(&self) -> Rank;

    /// Number of peers, including this node.
    fn size(&self) -> usize;

    /// Queue a message to `dest`. Never blocks on the destination.
    fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()>;

    /// Peek the next queued message whose tag is in `tags`, without
    /// consuming it.
    fn probe(&self, tags: &[Tag]) -> Option<(Rank, Tag)>;

    /// Consume the next queued message from `source` with `tag`, blocking
    /// until one is available.
    fn recv(&self, source: Rank, tag: Tag) -> Result<Vec<u8>>;
}

/// How long [`LocalNode::recv`] waits before giving up. Callers probe before
/// receiving, so this only trips on protocol bugs instead of hanging a test
/// run.
const RECV_TIMEOUT: Duration = Duration::from_secs(10);

struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

/// One endpoint of an in-memory cluster.
///
/// Built in sets via [`LocalNode::cluster`]; useful for tests and for hosts
/// running several peers inside one process.
pub struct LocalNode {
    rank: Rank,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    /// Messages pulled off the inbox but not yet consumed by a selective
    /// receive, in arrival order.
    pending: Mutex<VecDeque<Envelope>>,
}

impl LocalNode {
    /// Create a fully connected cluster of `size` nodes.
    pub fn cluster(size: usize) -> Vec<LocalNode> {
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalNode {
                rank,
                peers: senders.clone(),
                inbox,
                pending: Mutex::new(VecDeque::new()),
            })
            .collect()
    }

    /// Move everything queued on the channel into the pending list.
    fn drain_inbox(&self, pending: &mut VecDeque<Envelope>) {
        while let Ok(envelope) = self.inbox.try_recv() {
            pending.push_back(envelope);
        }
    }
}

impl Communicator for LocalNode {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let sender = self
            .peers
            .get(dest)
            .ok_or_else(|| Error::transport(format!("no such rank {}", dest)))?;
        sender
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| Error::transport(format!("rank {} is gone", dest)))
    }

    fn probe(&self, tags: &[Tag]) -> Option<(Rank, Tag)> {
        let mut pending = self.pending.lock();
        self.drain_inbox(&mut pending);
        pending
            .iter()
            .find(|e| tags.contains(&e.tag))
            .map(|e| (e.source, e.tag))
    }

    fn recv(&self, source: Rank, tag: Tag) -> Result<Vec<u8>> {
        let deadline = Instant::now() + RECV_TIMEOUT;
        loop {
            {
                let mut pending = self.pending.lock();
                self.drain_inbox(&mut pending);
                if let Some(pos) = pending
                    .iter()
                    .position(|e| e.source == source && e.tag == tag)
                {
                    if let Some(envelope) = pending.remove(pos) {
                        return Ok(envelope.payload);
                    }
                }
            }

            let timeout = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO)
                .min(Duration::from_millis(10));
            match self.inbox.recv_timeout(timeout) {
                Ok(envelope) => self.pending.lock().push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(Error::transport(format!(
                            "timed out receiving tag {} from rank {}",
                            tag, source
                        )));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::transport(format!(
                        "inbox closed waiting for rank {}",
                        source
                    )));
                }
            }
        }
    }
}
