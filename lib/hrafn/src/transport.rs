use std::sync::Mutex;
use std::thread;

use crossbeam_channel as channel;
use thiserror::Error;

use crate::index::IndexRec;

pub type Tag = u32;

/// Gang-internal poison marker; never used by the sort protocol.
pub(crate) const TAG_ABORT: Tag = u32::MAX;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer channel closed")]
    Closed,
    #[error("rank {src} aborted the run")]
    Aborted { src: usize },
    #[error("expected {expected} records from rank {src}, got {got}")]
    SizeMismatch { src: usize, expected: usize, got: usize },
    #[error("transport fault: {0}")]
    Fault(String),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration: {0}")]
    Config(String),
}

/// Two-party typed message capability, the only polymorphic surface in
/// the pipeline. Message sizes are always computable by both parties, so
/// receives state the exact count they expect and a differing count is a
/// desynchronization, not something to negotiate over.
pub trait Transport {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&self, dest: usize, tag: Tag, recs: &[IndexRec]) -> Result<(), TransportError>;
    fn recv(&self, src: usize, tag: Tag, expected: usize) -> Result<Vec<IndexRec>, TransportError>;
    /// Non-blocking send. The handle must be waited before the payload's
    /// backing storage goes away.
    fn send_nb(&self, dest: usize, tag: Tag, recs: &[IndexRec]) -> Result<Pending, TransportError>;
}

/// Completion handle for a non-blocking send.
pub struct Pending(Option<thread::JoinHandle<Result<(), TransportError>>>);

impl Pending {
    pub(crate) fn done() -> Self {
        Pending(None)
    }

    pub(crate) fn spawned(handle: thread::JoinHandle<Result<(), TransportError>>) -> Self {
        Pending(Some(handle))
    }

    pub fn wait(mut self) -> Result<(), TransportError> {
        match self.0.take() {
            None => Ok(()),
            Some(handle) => handle.join().map_err(|_| TransportError::Closed)?,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub src: usize,
    pub tag: Tag,
    pub recs: Vec<IndexRec>,
}

/// In-process mesh: every rank is a thread and messages ride unbounded
/// channels. Receives are selective; an envelope that arrives ahead of
/// the round being waited on is stashed until its turn.
pub struct LocalMesh {
    rank: usize,
    peers: Vec<channel::Sender<Envelope>>,
    inbox: channel::Receiver<Envelope>,
    stash: Mutex<Vec<Envelope>>,
}

impl LocalMesh {
    /// Builds a fully connected gang of `size` endpoints, one per rank.
    pub fn gang(size: usize) -> Vec<LocalMesh> {
        assert!(size > 0);
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..size).map(|_| channel::unbounded()).unzip();
        rxs.into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalMesh {
                rank,
                peers: txs.clone(),
                inbox,
                stash: Mutex::new(Vec::new()),
            })
            .collect()
    }

    /// Best-effort poison to every peer so ranks blocked in recv fail
    /// fast instead of waiting on a dead partner.
    pub fn abort(&self) {
        for (dest, tx) in self.peers.iter().enumerate() {
            if dest != self.rank {
                let _ = tx.send(Envelope { src: self.rank, tag: TAG_ABORT, recs: Vec::new() });
            }
        }
    }

    fn take_stashed(&self, src: usize, tag: Tag) -> Option<Envelope> {
        let mut stash = self.stash.lock().unwrap();
        let at = stash.iter().position(|e| e.src == src && e.tag == tag)?;
        Some(stash.swap_remove(at))
    }
}

impl Transport for LocalMesh {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: Tag, recs: &[IndexRec]) -> Result<(), TransportError> {
        let env = Envelope { src: self.rank, tag, recs: recs.to_vec() };
        self.peers[dest].send(env).map_err(|_| TransportError::Closed)
    }

    fn recv(&self, src: usize, tag: Tag, expected: usize) -> Result<Vec<IndexRec>, TransportError> {
        let env = match self.take_stashed(src, tag) {
            Some(env) => env,
            None => loop {
                let env = self.inbox.recv().map_err(|_| TransportError::Closed)?;
                if env.tag == TAG_ABORT {
                    return Err(TransportError::Aborted { src: env.src });
                }
                if env.src == src && env.tag == tag {
                    break env;
                }
                self.stash.lock().unwrap().push(env);
            },
        };
        if env.recs.len() != expected {
            return Err(TransportError::SizeMismatch { src, expected, got: env.recs.len() });
        }
        Ok(env.recs)
    }

    fn send_nb(&self, dest: usize, tag: Tag, recs: &[IndexRec]) -> Result<Pending, TransportError> {
        // Unbounded channel: the send completes immediately.
        self.send(dest, tag, recs)?;
        Ok(Pending::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn rec(key: u64) -> IndexRec {
        IndexRec { key, offset: 0, len: 8 }
    }

    #[test]
    fn send_and_recv_between_ranks() {
        let mut gang = LocalMesh::gang(2);
        let b = gang.pop().unwrap();
        let a = gang.pop().unwrap();

        thread::scope(|s| {
            s.spawn(|| a.send(1, 7, &[rec(1), rec(2)]).unwrap());
            let got = b.recv(0, 7, 2).unwrap();
            assert_eq!(got.len(), 2);
            assert_eq!(got[0].key, 1);
        });
    }

    #[test]
    fn zero_element_messages_work() {
        let gang = LocalMesh::gang(2);
        gang[0].send(1, 3, &[]).unwrap();
        assert!(gang[1].recv(0, 3, 0).unwrap().is_empty());
    }

    #[test]
    fn out_of_order_envelopes_are_stashed() {
        let gang = LocalMesh::gang(3);
        // Round 1 traffic lands before round 0 traffic.
        gang[2].send(0, 701, &[rec(9)]).unwrap();
        gang[1].send(0, 700, &[rec(4)]).unwrap();

        let first = gang[0].recv(1, 700, 1).unwrap();
        assert_eq!(first[0].key, 4);
        let second = gang[0].recv(2, 701, 1).unwrap();
        assert_eq!(second[0].key, 9);
    }

    #[test]
    fn size_mismatch_is_fatal() {
        let gang = LocalMesh::gang(2);
        gang[0].send(1, 5, &[rec(1)]).unwrap();
        let err = gang[1].recv(0, 5, 2).unwrap_err();
        assert!(matches!(
            err,
            TransportError::SizeMismatch { src: 0, expected: 2, got: 1 }
        ));
    }

    #[test]
    fn abort_unblocks_a_pending_recv() {
        let mut gang = LocalMesh::gang(2);
        let b = gang.pop().unwrap();
        let a = gang.pop().unwrap();

        thread::scope(|s| {
            s.spawn(move || a.abort());
            let err = b.recv(0, 1, 1).unwrap_err();
            assert!(matches!(err, TransportError::Aborted { src: 0 }));
        });
    }

    #[test]
    fn pending_done_completes_immediately() {
        let gang = LocalMesh::gang(2);
        let pending = gang[0].send_nb(1, 2, &[rec(8)]).unwrap();
        pending.wait().unwrap();
        assert_eq!(gang[1].recv(0, 2, 1).unwrap()[0].key, 8);
    }
}
