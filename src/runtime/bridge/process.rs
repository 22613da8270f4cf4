//! Cross-process bridge
//!
//! Data crosses process boundaries over loopback TCP as JSON lines. Each
//! connection uses its own stream: the emitting side opens it lazily on the
//! first frame and announces the connection's wire key, then writes
//! `data`/`close` frames. Each process that hosts receivers owns one
//! [`ProcessLink`] which accepts those streams and routes frames into the
//! matching [`TickBuffer`].
//!
//! Peer addresses are only known once every computer is set up, so senders
//! resolve them through a [`PeerDirectory`] filled in right before start.

use crossbeam_channel::{Receiver, Sender as CrossbeamSender, unbounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::iter;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::thread::{SharedReceiver, TickBuffer};
use super::{BridgeKind, BridgeSender, Event};
use crate::runtime::errors::BridgeError;
use crate::runtime::pipeline::{ConnectionId, NodeId};

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const CONNECT_RETRY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum WireFrame {
    Hello { conn: String },
    Data { ctr: u64, item: Value },
    Close,
}

/// Key identifying a connection on the wire, stable across processes
pub fn wire_key(emit_node: &str, emit_port: &str, recv_node: &str, recv_port: &str) -> String {
    format!("{}:{}->{}:{}", emit_node, emit_port, recv_node, recv_port)
}

/// Listening addresses of every process hosting receivers, keyed by process
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: OnceLock<BTreeMap<String, SocketAddr>>,
}

impl PeerDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish the addresses. Only the first call has an effect.
    pub fn set(&self, peers: BTreeMap<String, SocketAddr>) -> bool {
        self.peers.set(peers).is_ok()
    }

    pub fn get(&self, process: &str) -> Option<SocketAddr> {
        self.peers.get().and_then(|p| p.get(process).copied())
    }

    /// Every published address, empty before [`set`](PeerDirectory::set)
    pub fn snapshot(&self) -> BTreeMap<String, SocketAddr> {
        self.peers.get().cloned().unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.peers.get().is_some()
    }
}

/// Emitting half of a process bridge
///
/// `put` only queues the frame; a writer thread owns the socket.
pub struct ProcessSender {
    label: String,
    frames: CrossbeamSender<WireFrame>,
    closed: AtomicBool,
}

impl ProcessSender {
    /// Start the writer for connection `key`, delivering to process `target`
    pub fn spawn(
        key: String,
        target: String,
        peers: Arc<PeerDirectory>,
        connect_timeout: Duration,
    ) -> io::Result<Self> {
        let (frames, rx) = unbounded();
        let label = key.clone();
        thread::Builder::new()
            .name(format!("bridge {}", key))
            .spawn(move || writer_loop(key, target, peers, rx, connect_timeout))?;
        Ok(Self {
            label,
            frames,
            closed: AtomicBool::new(false),
        })
    }
}

impl BridgeSender for ProcessSender {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Process
    }

    fn put(&self, ctr: u64, item: Value) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Closed(self.label.clone()));
        }
        self.frames
            .send(WireFrame::Data { ctr, item })
            .map_err(|_| BridgeError::Disconnected(self.label.clone()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.frames.send(WireFrame::Close);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match TcpStream::connect_timeout(&addr, remaining.max(CONNECT_RETRY)) {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() >= deadline => return Err(e),
            Err(_) => thread::sleep(CONNECT_RETRY),
        }
    }
}

fn write_frame(writer: &mut impl Write, frame: &WireFrame) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, frame)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn writer_loop(
    key: String,
    target: String,
    peers: Arc<PeerDirectory>,
    frames: Receiver<WireFrame>,
    connect_timeout: Duration,
) {
    // nothing is sent until the first frame, so idle edges cost no socket
    let Ok(first) = frames.recv() else {
        debug!("[{}] sender dropped before sending anything", key);
        return;
    };

    let Some(addr) = peers.get(&target) else {
        error!("[{}] no address known for process '{}'", key, target);
        return;
    };

    let stream = match connect(addr, connect_timeout) {
        Ok(stream) => stream,
        Err(e) => {
            error!("[{}] failed to connect to {} at {}: {}", key, target, addr, e);
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let mut writer = BufWriter::new(stream);

    let hello = WireFrame::Hello { conn: key.clone() };
    for frame in iter::once(hello).chain(iter::once(first)).chain(frames.iter()) {
        let closing = frame == WireFrame::Close;
        if let Err(e) = write_frame(&mut writer, &frame) {
            warn!("[{}] write failed: {}", key, e);
            return;
        }
        if closing {
            debug!("[{}] closed", key);
            return;
        }
    }
    // sender dropped without close: dropping the stream reads as EOF on the other side
}

#[derive(Clone)]
struct Route {
    node: NodeId,
    conn: ConnectionId,
    buffer: Arc<TickBuffer>,
    inbox: CrossbeamSender<Event>,
}

impl Route {
    fn close(&self) {
        if self.buffer.close() {
            let _ = self.inbox.send(Event::Closed {
                node: self.node,
                conn: self.conn,
            });
        }
    }
}

/// Receiving endpoint of one process for every incoming process bridge
pub struct ProcessLink {
    name: String,
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
}

impl ProcessLink {
    /// Listen on an ephemeral loopback port
    pub fn bind(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_handle = {
            let name = name.clone();
            let routes = Arc::clone(&routes);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name(format!("link {}", name))
                .spawn(move || accept_loop(name, listener, routes, shutdown))?
        };

        info!("[{}] listening for process bridges on {}", name, addr);
        Ok(Self {
            name,
            addr,
            routes,
            shutdown,
            accept_handle: Some(accept_handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Route frames of connection `key` to `node`, notifying `inbox`
    pub fn register(
        &self,
        key: impl Into<String>,
        node: NodeId,
        conn: ConnectionId,
        inbox: CrossbeamSender<Event>,
    ) -> SharedReceiver {
        let buffer = TickBuffer::new();
        self.routes.lock().insert(
            key.into(),
            Route {
                node,
                conn,
                buffer: Arc::clone(&buffer),
                inbox,
            },
        );
        SharedReceiver::new(buffer, BridgeKind::Process)
    }

    /// Stop accepting new streams. Streams already open run until EOF.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept_handle.take()
            && handle.join().is_err()
        {
            warn!("[{}] accept thread panicked", self.name);
        }
    }
}

impl Drop for ProcessLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    name: String,
    listener: TcpListener,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("[{}] accepted stream from {}", name, peer);
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("[{}] dropping stream from {}: {}", name, peer, e);
                    continue;
                }
                let name = name.clone();
                let routes = Arc::clone(&routes);
                if let Err(e) = thread::Builder::new()
                    .name(format!("link {} reader", name))
                    .spawn(move || read_loop(&name, stream, &routes))
                {
                    error!("failed to spawn bridge reader: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("[{}] accept failed: {}", name, e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("[{}] no longer accepting", name);
}

fn read_loop(name: &str, stream: TcpStream, routes: &Mutex<HashMap<String, Route>>) {
    let mut lines = BufReader::new(stream).lines();

    let key = match lines.next().map(|l| l.and_then(|l| Ok(serde_json::from_str(&l)?))) {
        Some(Ok(WireFrame::Hello { conn })) => conn,
        Some(Ok(other)) => {
            warn!("[{}] expected hello, got {:?}", name, other);
            return;
        }
        Some(Err(e)) => {
            warn!("[{}] bad handshake: {}", name, e);
            return;
        }
        None => return,
    };

    let Some(route) = routes.lock().get(&key).cloned() else {
        warn!("[{}] no receiver registered for {}", name, key);
        return;
    };

    for line in lines {
        let frame: io::Result<WireFrame> = line.and_then(|l| Ok(serde_json::from_str(&l)?));
        match frame {
            Ok(WireFrame::Data { ctr, item }) => {
                route.buffer.insert(ctr, item);
                let event = Event::Data {
                    node: route.node,
                    ctr,
                };
                if route.inbox.send(event).is_err() {
                    debug!("[{}] receiver of {} is gone", name, key);
                    return;
                }
            }
            Ok(WireFrame::Close) => {
                route.close();
                return;
            }
            Ok(WireFrame::Hello { .. }) => warn!("[{}] unexpected hello on {}", name, key),
            Err(e) => {
                warn!("[{}] read failed on {}: {}", name, key, e);
                break;
            }
        }
    }

    warn!("[{}] {} ended without close", name, key);
    route.close();
}
