//! Raw bidirectional message channels between the two processes.
//!
//! The router only needs two things from a transport: a way to push a frame
//! to the other side, and a stream of frames coming back. Frames are opaque
//! bytes; the router owns the envelope format.

use crate::error::{Result, WtforkError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use zeromq::{DealerSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Environment variable carrying the parent's ZMQ port to the child.
pub const PORT_ENV: &str = "WTFORK_ZMQ_PORT";

/// Outbound half of a transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_raw(&self, frame: Bytes) -> Result<()>;

    /// Stop sending and end this side's inbound stream. Later sends fail
    /// with [`WtforkError::Disconnected`]. Closing twice is a no-op.
    fn close(&self);
}

/// Inbound half of a transport. Ends when the transport closes.
pub type Inbound = mpsc::UnboundedReceiver<Bytes>;

/// Both halves of one side's transport.
pub struct Connection {
    pub outbound: Arc<dyn Transport>,
    pub inbound: Inbound,
}

// ---------------------------------------------------------------------------
// In-memory bus
// ---------------------------------------------------------------------------

type Endpoints = Vec<(u64, mpsc::UnboundedSender<Bytes>)>;

/// Shared in-process medium. Every frame sent by one endpoint is delivered to
/// every other attached endpoint, so several pairs can share one bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    endpoints: Arc<Mutex<Endpoints>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two endpoints on a fresh bus, like the two ends of a pipe.
    pub fn pair() -> (Connection, Connection) {
        let bus = Self::new();
        (bus.attach(), bus.attach())
    }

    pub fn attach(&self) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, tx));

        Connection {
            outbound: Arc::new(MemoryTransport {
                id,
                bus: self.clone(),
            }),
            inbound: rx,
        }
    }

    /// Number of endpoints still attached.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Detach every endpoint. All inbound streams end.
    pub fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Endpoints> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outbound half of a [`MemoryBus`] endpoint.
pub struct MemoryTransport {
    id: u64,
    bus: MemoryBus,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_raw(&self, frame: Bytes) -> Result<()> {
        let mut endpoints = self.bus.lock();
        if !endpoints.iter().any(|(id, _)| *id == self.id) {
            return Err(WtforkError::Disconnected);
        }
        endpoints.retain(|(id, tx)| *id == self.id || tx.send(frame.clone()).is_ok());
        Ok(())
    }

    /// Detach from the bus.
    fn close(&self) {
        self.bus.lock().retain(|(id, _)| *id != self.id);
    }
}

// ---------------------------------------------------------------------------
// ZeroMQ process transport
// ---------------------------------------------------------------------------

/// Outbound half of a ZMQ-backed connection. The socket itself is owned by a
/// background task, which closes it once this half is closed.
pub struct ZmqTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

#[async_trait]
impl Transport for ZmqTransport {
    async fn send_raw(&self, frame: Bytes) -> Result<()> {
        self.push(frame)
    }

    fn close(&self) {
        // Dropping the sender stops the socket task
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl ZmqTransport {
    fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn push(&self, frame: Bytes) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| WtforkError::Disconnected),
            None => Err(WtforkError::Disconnected),
        }
    }

    /// Parent side: bind a ROUTER socket on `port` and wait for the child.
    pub async fn bind(port: u16) -> Result<Connection> {
        let mut socket = RouterSocket::new();
        socket
            .bind(&format!("tcp://127.0.0.1:{}", port))
            .await
            .map_err(|e| WtforkError::Zmq(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(router_loop(socket, out_rx, in_tx));

        Ok(Connection {
            outbound: Arc::new(ZmqTransport::new(out_tx)),
            inbound: in_rx,
        })
    }

    /// Child side: connect a DEALER socket to the parent's port.
    pub async fn connect(port: u16) -> Result<Connection> {
        let mut socket = DealerSocket::new();
        socket
            .connect(&format!("tcp://127.0.0.1:{}", port))
            .await
            .map_err(|e| WtforkError::Zmq(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(dealer_loop(socket, out_rx, in_tx));

        Ok(Connection {
            outbound: Arc::new(ZmqTransport::new(out_tx)),
            inbound: in_rx,
        })
    }
}

/// Find a free local port for the parent to bind.
pub fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn frames(parts: Vec<Bytes>) -> Result<ZmqMessage> {
    parts
        .try_into()
        .map_err(|_| WtforkError::Zmq("Empty message".to_string()))
}

async fn router_loop(
    mut socket: RouterSocket,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    inbound: mpsc::UnboundedSender<Bytes>,
) {
    // ROUTER needs the dealer's routing id, learned from its first frame.
    // Frames sent before that are held back.
    let mut peer: Option<Bytes> = None;
    let mut backlog: VecDeque<Bytes> = VecDeque::new();

    'routing: loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match peer {
                    Some(ref id) => {
                        if router_send(&mut socket, id, frame).await.is_err() {
                            break;
                        }
                    }
                    None => backlog.push_back(frame),
                }
            }
            received = socket.recv() => {
                let Ok(msg) = received else { continue };
                // ROUTER receives: [identity, empty, payload]
                let mut parts = msg.into_vec();
                if parts.len() < 2 {
                    continue;
                }
                let id = parts.remove(0);
                if peer.is_none() {
                    while let Some(frame) = backlog.pop_front() {
                        if router_send(&mut socket, &id, frame).await.is_err() {
                            break 'routing;
                        }
                    }
                    peer = Some(id);
                }
                if let Some(payload) = parts.pop() {
                    if inbound.send(payload).is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Unbinds the port; `inbound` drops with this task
    let _ = socket.close().await;
}

async fn router_send(socket: &mut RouterSocket, id: &Bytes, payload: Bytes) -> Result<()> {
    let msg = frames(vec![id.clone(), Bytes::new(), payload])?;
    socket
        .send(msg)
        .await
        .map_err(|e| WtforkError::Zmq(e.to_string()))
}

async fn dealer_loop(
    mut socket: DealerSocket,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    inbound: mpsc::UnboundedSender<Bytes>,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                // DEALER sends: [empty, payload]
                let Ok(msg) = frames(vec![Bytes::new(), frame]) else { continue };
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            received = socket.recv() => {
                let Ok(msg) = received else { continue };
                if let Some(payload) = msg.into_vec().pop() {
                    if inbound.send(payload).is_err() {
                        break;
                    }
                }
            }
        }
    }

    let _ = socket.close().await;
}
