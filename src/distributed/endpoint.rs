//! Transport endpoint
//!
//! An addressable mailbox host: asynchronous tagged sends, blocking receives
//! per mailbox, backed by a pool of TCP connections.
//!
//! # Tasks
//!
//! - **Listener**: accepts inbound connections, reads the HELLO handshake and
//!   registers the connection under the peer's published address
//! - **Sender**: drains the send queue in FIFO order, opening connections on
//!   first use
//! - **Readers**: one per connection; read header + payload and route the
//!   message to its mailbox queue
//!
//! Connections are shared both ways: a connection opened by A towards B is
//! also the one B uses to reply to A.

use crate::config::EndpointConfig;
use crate::distributed::address::EndpointAddress;
use crate::distributed::protocol::{self, FrameHeader, Hello, PROTOCOL_VERSION};
use crate::error::{RedistError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Time a freshly accepted connection has to send its HELLO
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A delivered message
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: EndpointAddress,
    pub receiver: EndpointAddress,
    pub mailbox: u32,
    pub payload: Bytes,
    /// Whether the sender handed its buffer over rather than sharing it
    pub owned: bool,
}

impl Message {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

struct Outgoing {
    target: EndpointAddress,
    mailbox: u32,
    payload: Bytes,
    owned: bool,
}

struct Connection {
    id: u64,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

type Queue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>;

struct MailboxQueue {
    tx: mpsc::UnboundedSender<Message>,
    rx: Queue,
}

/// State shared by the endpoint handle and its tasks
struct Shared {
    address: EndpointAddress,
    max_payload: u64,
    connections: DashMap<EndpointAddress, Arc<Connection>>,
    mailboxes: DashMap<u32, MailboxQueue>,
    next_connection_id: AtomicU64,
    shutdown: CancellationToken,
    readers: TaskTracker,
}

impl Shared {
    fn register(&self, peer: EndpointAddress, writer: OwnedWriteHalf) -> Arc<Connection> {
        let connection = Arc::new(Connection {
            id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            writer: tokio::sync::Mutex::new(writer),
        });

        if self.connections.insert(peer.clone(), connection.clone()).is_some() {
            debug!(%peer, "replaced existing connection");
        } else {
            debug!(%peer, "connection registered");
        }

        connection
    }

    fn drop_connection(&self, peer: &EndpointAddress, id: u64) {
        if self.connections.remove_if(peer, |_, c| c.id == id).is_some() {
            debug!(%peer, "connection removed");
        }
    }

    /// Reuse the connection to `target` or open one (connect + HELLO)
    async fn connection_to(self: &Arc<Self>, target: &EndpointAddress) -> Result<Arc<Connection>> {
        if let Some(existing) = self.connections.get(target) {
            return Ok(existing.value().clone());
        }

        let setup = |source| RedistError::TransportSetup {
            address: target.to_string(),
            source,
        };

        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(setup)?;
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();

        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            address: self.address.clone(),
        };
        protocol::write_frame(&mut writer, &hello).await.map_err(setup)?;

        let connection = self.register(target.clone(), writer);
        let shared = self.clone();
        let peer = target.clone();
        let id = connection.id;
        self.readers.spawn(async move { read_loop(shared, peer, id, reader).await });

        Ok(connection)
    }

    fn route(&self, message: Message) {
        match self.mailboxes.get(&message.mailbox) {
            Some(queue) => {
                trace!(sender = %message.sender, mailbox = message.mailbox, len = message.len(), "message queued");
                // The queue owns its receiver, so this send cannot fail
                let _ = queue.tx.send(message);
            }
            None => {
                let err = RedistError::UnroutableMessage {
                    sender: message.sender,
                    mailbox: message.mailbox,
                };
                warn!(%err, "dropping message");
            }
        }
    }
}

/// Transport endpoint
///
/// Created by [`Endpoint::open`]; the published [`address`](Endpoint::address)
/// must reach peers (usually through the metadata phase) before they can
/// send to it.
pub struct Endpoint {
    shared: Arc<Shared>,
    send_tx: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    sender: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
}

impl Endpoint {
    /// Bind the listener and start the endpoint's tasks
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(config: &EndpointConfig) -> Result<Self> {
        let bind_address = format!("{}:{}", config.bind_host, config.port);
        let listener = TcpListener::bind((config.bind_host.as_str(), config.port))
            .await
            .map_err(|source| RedistError::TransportSetup {
                address: bind_address.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(|source| RedistError::TransportSetup {
            address: bind_address.clone(),
            source,
        })?;

        let address = EndpointAddress::new(advertised_host(config), local.port());

        let shared = Arc::new(Shared {
            address: address.clone(),
            max_payload: config.max_payload,
            connections: DashMap::new(),
            mailboxes: DashMap::new(),
            next_connection_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            readers: TaskTracker::new(),
        });

        let poll = Duration::from_millis(config.accept_poll_interval_ms.max(1));
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(listen_loop(shared.clone(), listener, poll));
        let sender = tokio::spawn(send_loop(shared.clone(), send_rx));

        info!(%address, bound = %local, "endpoint open");

        Ok(Self {
            shared,
            send_tx: Mutex::new(Some(send_tx)),
            sender: Mutex::new(Some(sender)),
            listener: Mutex::new(Some(listener)),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
        })
    }

    /// Published address of this endpoint
    pub fn address(&self) -> &EndpointAddress {
        &self.shared.address
    }

    /// Queue `payload` for `target`, handing the buffer over
    ///
    /// Never waits for I/O. Delivery order is preserved per target.
    pub fn send(&self, target: &EndpointAddress, mailbox: u32, payload: Vec<u8>) -> Result<()> {
        self.enqueue(target, mailbox, Bytes::from(payload), true)
    }

    /// Queue a shared view of a buffer the caller keeps using
    pub fn send_shared(&self, target: &EndpointAddress, mailbox: u32, payload: Bytes) -> Result<()> {
        self.enqueue(target, mailbox, payload, false)
    }

    fn enqueue(&self, target: &EndpointAddress, mailbox: u32, payload: Bytes, owned: bool) -> Result<()> {
        let guard = self.send_tx.lock();
        let tx = guard.as_ref().ok_or(RedistError::Shutdown)?;
        tx.send(Outgoing {
            target: target.clone(),
            mailbox,
            payload,
            owned,
        })
        .map_err(|_| RedistError::Shutdown)
    }

    /// Open (or reuse) the connection to `target` now
    ///
    /// Connect and handshake failures are returned here instead of being
    /// logged by the sender task later.
    pub async fn connect(&self, target: &EndpointAddress) -> Result<()> {
        if self.is_closed() {
            return Err(RedistError::Shutdown);
        }
        self.shared.connection_to(target).await.map(|_| ())
    }

    /// Register mailbox `id` and return a receiving handle
    ///
    /// Messages addressed to a mailbox before it is registered are dropped.
    /// Registering an existing mailbox returns a handle to the same queue.
    pub fn mailbox(&self, id: u32) -> Mailbox {
        let entry = self.shared.mailboxes.entry(id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            MailboxQueue {
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }
        });

        Mailbox {
            id,
            rx: entry.rx.clone(),
            shutdown: self.shared.shutdown.clone(),
        }
    }

    /// Wait for the next message on mailbox `id`, registering it if needed
    pub async fn receive(&self, id: u32) -> Result<Message> {
        self.mailbox(id).recv().await
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled() || self.send_tx.lock().is_none()
    }

    /// Stop the endpoint
    ///
    /// Lets the sender drain what is already queued (bounded by the drain
    /// timeout), then wakes every mailbox waiter with
    /// [`RedistError::Shutdown`] and drops all connections.
    pub async fn close(&self) {
        drop(self.send_tx.lock().take());

        // Readers stay up while draining: a reader that exits removes its
        // connection and the next queued message would open a new one
        let sender = self.sender.lock().take();
        if let Some(mut handle) = sender {
            if tokio::time::timeout(self.drain_timeout, &mut handle).await.is_err() {
                warn!(address = %self.shared.address, "send queue not drained before timeout");
                handle.abort();
            }
        }

        self.shared.shutdown.cancel();

        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }

        self.shared.connections.clear();
        self.shared.mailboxes.clear();

        self.shared.readers.close();
        if tokio::time::timeout(self.drain_timeout, self.shared.readers.wait())
            .await
            .is_err()
        {
            warn!(address = %self.shared.address, "connection readers still running after close");
        }

        info!(address = %self.shared.address, "endpoint closed");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Receiving handle for one mailbox
#[derive(Clone)]
pub struct Mailbox {
    id: u32,
    rx: Queue,
    shutdown: CancellationToken,
}

impl Mailbox {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the next message
    ///
    /// Concurrent callers are served one message each, in arrival order.
    pub async fn recv(&self) -> Result<Message> {
        let mut rx = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(RedistError::Shutdown),
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RedistError::Shutdown),
            message = rx.recv() => message.ok_or(RedistError::Shutdown),
        }
    }

    /// Take a queued message without waiting
    pub fn try_recv(&self) -> Option<Message> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

fn advertised_host(config: &EndpointConfig) -> String {
    if let Some(ref host) = config.advertise_host {
        return host.clone();
    }

    match config.bind_host.as_str() {
        "" | "0.0.0.0" | "::" | "[::]" => hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string()),
        host => host.to_string(),
    }
}

async fn listen_loop(shared: Arc<Shared>, listener: TcpListener, poll: Duration) {
    loop {
        // The bounded wait keeps shutdown observable with no inbound traffic
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = tokio::time::timeout(poll, listener.accept()) => accepted,
        };

        match accepted {
            Err(_) => continue,
            Ok(Ok((stream, remote))) => {
                let shared_for_task = shared.clone();
                shared
                    .readers
                    .spawn(async move { accept_connection(shared_for_task, stream, remote).await });
            }
            Ok(Err(source)) => {
                let err = RedistError::TransportSetup {
                    address: shared.address.to_string(),
                    source,
                };
                error!(%err, "accept failed, shutting endpoint down");
                shared.shutdown.cancel();
                break;
            }
        }
    }

    debug!(address = %shared.address, "listener stopped");
}

async fn accept_connection(shared: Arc<Shared>, stream: TcpStream, remote: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();

    let hello = tokio::select! {
        _ = shared.shutdown.cancelled() => return,
        hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, protocol::read_frame::<_, Hello>(&mut reader)) => hello,
    };

    let hello = match hello {
        Ok(Ok(Some(hello))) => hello,
        Ok(Ok(None)) => {
            debug!(%remote, "peer closed before handshake");
            return;
        }
        Ok(Err(e)) => {
            warn!(%remote, error = %e, "handshake failed");
            return;
        }
        Err(_) => {
            warn!(%remote, "handshake timed out");
            return;
        }
    };

    if hello.protocol_version != PROTOCOL_VERSION {
        let err = RedistError::Protocol(format!(
            "protocol version mismatch: peer={}, local={}",
            hello.protocol_version, PROTOCOL_VERSION
        ));
        warn!(%remote, %err, "rejecting connection");
        return;
    }

    debug!(%remote, peer = %hello.address, "accepted connection");
    let connection = shared.register(hello.address.clone(), writer);
    read_loop(shared, hello.address, connection.id, reader).await;
}

async fn read_loop(shared: Arc<Shared>, peer: EndpointAddress, id: u64, mut reader: OwnedReadHalf) {
    loop {
        let frame = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            frame = protocol::read_message(&mut reader, shared.max_payload) => frame,
        };

        match frame {
            Ok(Some((header, payload))) => {
                shared.route(Message {
                    sender: header.sender(),
                    receiver: shared.address.clone(),
                    mailbox: header.mailbox,
                    payload,
                    owned: header.owned,
                });
            }
            Ok(None) => {
                debug!("{}", RedistError::PeerClosed(peer.clone()));
                break;
            }
            Err(source) => {
                let err = RedistError::TransportIo {
                    peer: peer.clone(),
                    source,
                };
                warn!(%err, "closing connection");
                break;
            }
        }
    }

    shared.drop_connection(&peer, id);
}

async fn send_loop(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(out) = queue.recv().await {
        let connection = match shared.connection_to(&out.target).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(%err, mailbox = out.mailbox, "dropping message");
                continue;
            }
        };

        let header = FrameHeader {
            sender_host: shared.address.host.clone(),
            sender_port: shared.address.port,
            mailbox: out.mailbox,
            payload_len: out.payload.len() as u64,
            owned: out.owned,
        };

        let written = {
            let mut writer = connection.writer.lock().await;
            protocol::write_message(&mut *writer, &header, &out.payload).await
        };

        match written {
            Ok(()) => trace!(target = %out.target, mailbox = out.mailbox, len = out.payload.len(), "message sent"),
            Err(source) => {
                let err = RedistError::TransportIo {
                    peer: out.target.clone(),
                    source,
                };
                warn!(%err, "closing connection");
                shared.drop_connection(&out.target, connection.id);
            }
        }
    }

    debug!(address = %shared.address, "send queue drained");
}
