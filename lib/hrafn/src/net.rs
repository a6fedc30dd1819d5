use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::constants::{CONNECT_RETRY_WINDOW_MS, ENV_HOSTS};
use crate::index::{self, IndexRec, WIRE_SIZE};
use crate::transport::{Envelope, Pending, Tag, Transport, TransportError};

/// Frame header: src u32 | tag u32 | count u64, little-endian. The body
/// is count serialized IndexRecs; sizes are derivable on both ends, so
/// frames carry no negotiation.
const FRAME_HEADER: usize = 16;

/// True when this process runs inside a Slurm job step.
pub fn running_under_slurm() -> bool {
    std::env::var_os("SLURM_JOB_ID").is_some()
}

#[derive(Default)]
struct MailState {
    envelopes: Vec<Envelope>,
    fault: Option<String>,
    closed: bool,
}

struct Mailbox {
    state: Mutex<MailState>,
    ready: Condvar,
}

impl Mailbox {
    fn push(&self, env: Envelope) {
        self.state.lock().unwrap().envelopes.push(env);
        self.ready.notify_all();
    }

    fn fail(&self, reason: String) {
        self.state.lock().unwrap().fault = Some(reason);
        self.ready.notify_all();
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.ready.notify_all();
    }
}

/// One process per rank. A background acceptor drains this rank's
/// listener into a mailbox; `recv` matches envelopes by (src, tag), so
/// frames from different partners and rounds may arrive in any order.
pub struct TcpMesh {
    rank: usize,
    peers: Vec<SocketAddr>,
    mail: Arc<Mailbox>,
    stop: Arc<AtomicBool>,
    acceptor: Option<thread::JoinHandle<()>>,
}

impl TcpMesh {
    /// Builds the mesh from the launch environment: this task's rank
    /// from SLURM_PROCID, peer addresses from HRAFN_HOSTS
    /// ("host:port,host:port,..." in rank order). The host list is
    /// authoritative for world size; the Slurm task count is only
    /// cross-checked when it is exported.
    pub fn from_env() -> Result<Self, TransportError> {
        let rank = std::env::var("SLURM_PROCID")
            .map_err(|_| TransportError::Config("SLURM_PROCID not set".into()))?
            .parse::<usize>()
            .map_err(|e| TransportError::Config(format!("bad SLURM_PROCID: {e}")))?;
        let hosts = std::env::var(ENV_HOSTS)
            .map_err(|_| TransportError::Config(format!("{ENV_HOSTS} not set")))?;
        let peers = hosts
            .split(',')
            .map(|host| {
                host.trim()
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.next())
                    .ok_or_else(|| TransportError::Config(format!("bad peer address {host:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Ok(ntasks) = std::env::var("SLURM_NTASKS") {
            if ntasks.parse::<usize>().ok() != Some(peers.len()) {
                return Err(TransportError::Config(format!(
                    "{ENV_HOSTS} lists {} peers but SLURM_NTASKS is {ntasks}",
                    peers.len()
                )));
            }
        }
        if rank >= peers.len() {
            return Err(TransportError::Config(format!(
                "rank {rank} has no address in {ENV_HOSTS}"
            )));
        }
        Self::bind(rank, peers)
    }

    /// Binds this rank's address and starts the acceptor.
    pub fn bind(rank: usize, peers: Vec<SocketAddr>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(peers[rank])?;
        Ok(Self::with_listener(rank, peers, listener))
    }

    /// For pre-bound listeners; tests use ephemeral ports.
    pub fn with_listener(rank: usize, peers: Vec<SocketAddr>, listener: TcpListener) -> Self {
        let mail = Arc::new(Mailbox { state: Mutex::new(MailState::default()), ready: Condvar::new() });
        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let mail = Arc::clone(&mail);
            let stop = Arc::clone(&stop);
            thread::spawn(move || accept_loop(listener, mail, stop))
        };
        TcpMesh { rank, peers, mail, stop, acceptor: Some(acceptor) }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.peers[self.rank]
    }
}

fn accept_loop(listener: TcpListener, mail: Arc<Mailbox>, stop: Arc<AtomicBool>) {
    for conn in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match conn {
            Ok(stream) => {
                let mail = Arc::clone(&mail);
                thread::spawn(move || {
                    if let Err(e) = read_frame(stream, &mail) {
                        mail.fail(e.to_string());
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                mail.fail(e.to_string());
                break;
            }
        }
    }
    mail.close();
}

fn read_frame(mut stream: TcpStream, mail: &Mailbox) -> std::io::Result<()> {
    let mut header = [0u8; FRAME_HEADER];
    stream.read_exact(&mut header)?;
    let src = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let tag = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let count = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; count * WIRE_SIZE];
    stream.read_exact(&mut payload)?;
    match index::decode_recs(&payload) {
        Some(recs) => {
            debug!(src, tag, count, "frame received");
            mail.push(Envelope { src, tag, recs });
        }
        None => mail.fail(format!("undecodable frame from rank {src}")),
    }
    Ok(())
}

fn build_frame(src: usize, tag: Tag, recs: &[IndexRec]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER + recs.len() * WIRE_SIZE);
    frame.extend_from_slice(&(src as u32).to_le_bytes());
    frame.extend_from_slice(&tag.to_le_bytes());
    frame.extend_from_slice(&(recs.len() as u64).to_le_bytes());
    frame.extend_from_slice(&index::encode_recs(recs));
    frame
}

fn write_frame(addr: SocketAddr, frame: &[u8]) -> Result<(), TransportError> {
    let mut stream = connect_with_retry(addr)?;
    stream.write_all(frame)?;
    Ok(())
}

// Tolerates launch skew: a peer's listener may not be up yet when the
// first frame heads its way. Failures on established connections are
// never retried.
fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream, TransportError> {
    let deadline = Instant::now() + Duration::from_millis(CONNECT_RETRY_WINDOW_MS);
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(TransportError::Io(e));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

impl Transport for TcpMesh {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: Tag, recs: &[IndexRec]) -> Result<(), TransportError> {
        write_frame(self.peers[dest], &build_frame(self.rank, tag, recs))
    }

    fn recv(&self, src: usize, tag: Tag, expected: usize) -> Result<Vec<IndexRec>, TransportError> {
        let mut state = self.mail.state.lock().unwrap();
        loop {
            if let Some(at) = state.envelopes.iter().position(|e| e.src == src && e.tag == tag) {
                let env = state.envelopes.swap_remove(at);
                if env.recs.len() != expected {
                    return Err(TransportError::SizeMismatch {
                        src,
                        expected,
                        got: env.recs.len(),
                    });
                }
                return Ok(env.recs);
            }
            if let Some(fault) = &state.fault {
                return Err(TransportError::Fault(fault.clone()));
            }
            if state.closed {
                return Err(TransportError::Closed);
            }
            state = self.mail.ready.wait(state).unwrap();
        }
    }

    fn send_nb(&self, dest: usize, tag: Tag, recs: &[IndexRec]) -> Result<Pending, TransportError> {
        let addr = self.peers[dest];
        let frame = build_frame(self.rank, tag, recs);
        Ok(Pending::spawned(thread::spawn(move || write_frame(addr, &frame))))
    }
}

impl Drop for TcpMesh {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // The stop flag carries the shutdown; the acceptor just needs a
        // kick out of accept(). One throwaway loopback connection does
        // that, dropped unwritten. If the listener is already gone there
        // is nothing to wake.
        let _ = TcpStream::connect(self.peers[self.rank]);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: u64) -> IndexRec {
        IndexRec { key, offset: key * 20, len: 8 }
    }

    fn gang(size: usize) -> Vec<TcpMesh> {
        let listeners: Vec<TcpListener> =
            (0..size).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()).collect();
        let peers: Vec<SocketAddr> =
            listeners.iter().map(|l| l.local_addr().unwrap()).collect();
        listeners
            .into_iter()
            .enumerate()
            .map(|(rank, l)| TcpMesh::with_listener(rank, peers.clone(), l))
            .collect()
    }

    #[test]
    fn frames_cross_the_wire_intact() {
        let gang = gang(2);
        let payload = vec![rec(3), rec(1), rec(u64::MAX / 20)];
        gang[0].send(1, 700, &payload).unwrap();
        let got = gang[1].recv(0, 700, 3).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn zero_count_frames_are_valid() {
        let gang = gang(2);
        gang[1].send(0, 650, &[]).unwrap();
        assert!(gang[0].recv(1, 650, 0).unwrap().is_empty());
    }

    #[test]
    fn selective_recv_matches_src_and_tag() {
        let gang = gang(3);
        gang[2].send(0, 701, &[rec(2)]).unwrap();
        gang[1].send(0, 700, &[rec(1)]).unwrap();
        assert_eq!(gang[0].recv(1, 700, 1).unwrap()[0].key, 1);
        assert_eq!(gang[0].recv(2, 701, 1).unwrap()[0].key, 2);
    }

    #[test]
    fn size_mismatch_is_fatal() {
        let gang = gang(2);
        gang[0].send(1, 7, &[rec(1), rec(2)]).unwrap();
        let err = gang[1].recv(0, 7, 5).unwrap_err();
        assert!(matches!(err, TransportError::SizeMismatch { expected: 5, got: 2, .. }));
    }

    #[test]
    fn nonblocking_send_completes() {
        let gang = gang(2);
        let pending = gang[0].send_nb(1, 9, &[rec(4)]).unwrap();
        pending.wait().unwrap();
        assert_eq!(gang[1].recv(0, 9, 1).unwrap()[0].key, 4);
    }

    // Drop must kick the acceptor out of accept() and join it; a missed
    // wake-up would hang this test.
    #[test]
    fn drop_wakes_an_idle_acceptor() {
        let meshes = gang(2);
        drop(meshes);
    }

    // Tearing down one endpoint mid-run must neither hang nor disturb a
    // peer that is still blocked in recv.
    #[test]
    fn dropping_a_peer_leaves_a_pending_recv_intact() {
        let mut meshes = gang(3);
        let c = meshes.pop().unwrap();
        let b = meshes.pop().unwrap();
        let a = meshes.pop().unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| b.recv(2, 9, 1));
            thread::sleep(Duration::from_millis(30));
            drop(a);
            c.send(1, 9, &[rec(5)]).unwrap();
            assert_eq!(waiter.join().unwrap().unwrap()[0].key, 5);
        });
    }
}
