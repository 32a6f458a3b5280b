//! Coordinator role: owns the listening endpoint, accepts connections,
//! keeps the peer directory, and relays broadcasts.
//!
//! Listening runs on a spawned task, so binding never blocks the caller.
//! Each accepted connection gets its own read task; the first frame a peer
//! sends is its raw identity, everything after that is framed protocol
//! traffic. No failure in one connection's traffic may disturb another
//! connection; the only fatal error is failing to bind.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use huddle_core::codec;
use huddle_core::config::{socket_path, HuddleConfig, TimeoutConfig};
use huddle_core::message::{Destination, Message, Method};

use crate::frame;
use crate::lock::WriteLock;
use crate::registry::{ConnEntry, ConnId, Registry};
use crate::send::{self, SendError};

/// Notifications the coordinator surfaces to the embedding application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The directory changed; current identities in registry order.
    DirectoryChanged(Vec<String>),
    /// An application-level message addressed to the server role.
    Message(Message),
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Listen could not be established, even after the stale-socket retry.
    /// Fatal to starting the service.
    #[error("failed to bind endpoint {path}: {source}")]
    Bind {
        path: PathBuf,
        source: io::Error,
    },
    /// No coordinator is listening on the endpoint.
    #[error("failed to connect to endpoint {path}: {source}")]
    Connect {
        path: PathBuf,
        source: io::Error,
    },
    #[error(transparent)]
    Send(#[from] SendError),
}

struct Shared {
    registry: Registry,
    lock: WriteLock,
    timeouts: TimeoutConfig,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    next_conn: AtomicU64,
}

/// The listening/coordinating role. One per endpoint.
pub struct IpcServer {
    shared: Arc<Shared>,
    path: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: Option<JoinHandle<()>>,
}

impl IpcServer {
    /// Bind the endpoint and start accepting. Returns the running server
    /// and its event stream.
    ///
    /// A crashed instance can leave the socket file behind; a bind refused
    /// with `AddrInUse` removes the stale file and retries exactly once.
    pub async fn bind(
        config: &HuddleConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), IpcError> {
        let path = socket_path(&config.endpoint.name);

        let listener = match UnixListener::bind(&path) {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::warn!(
                    path = %path.display(),
                    "endpoint busy, removing stale socket and retrying"
                );
                std::fs::remove_file(&path).map_err(|source| IpcError::Bind {
                    path: path.clone(),
                    source,
                })?;
                UnixListener::bind(&path).map_err(|source| IpcError::Bind {
                    path: path.clone(),
                    source,
                })?
            }
            Err(source) => return Err(IpcError::Bind { path, source }),
        };

        tracing::info!(path = %path.display(), "endpoint listening");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            registry: Registry::new(),
            lock: WriteLock::new(&config.endpoint.name, config.timeouts.lock()),
            timeouts: config.timeouts.clone(),
            event_tx,
            next_conn: AtomicU64::new(1),
        });

        let accept_task = tokio::spawn(accept_loop(
            listener,
            shared.clone(),
            shutdown_tx.clone(),
        ));

        let server = Self {
            shared,
            path,
            shutdown_tx,
            accept_task: Some(accept_task),
        };
        Ok((server, event_rx))
    }

    pub fn endpoint_path(&self) -> &Path {
        &self.path
    }

    /// Current directory, registry order.
    pub async fn peers(&self) -> Vec<String> {
        self.shared.registry.identities().await
    }

    /// Current connections with their identities, registry order.
    pub async fn connections(&self) -> Vec<(ConnId, String)> {
        self.shared
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|e| (e.id, e.identity))
            .collect()
    }

    /// Ask one peer to (re)announce itself on its own transport.
    pub async fn ask_whois(&self, id: ConnId) -> Result<(), IpcError> {
        let Some(entry) = self.shared.registry.find(id).await else {
            tracing::warn!(conn = %id, "whois query for unknown connection");
            return Ok(());
        };
        let msg = Message {
            sender_id: huddle_core::SERVER_ID.to_string(),
            dest: Destination::Direct,
            method: Method::WhoIs,
            args: Vec::new(),
        };
        let payload = codec::encode(&msg);
        send::send_frame(
            &self.shared.lock,
            &entry.writer,
            &payload,
            self.shared.timeouts.write(),
        )
        .await?;
        Ok(())
    }

    /// Tear down: stop accepting, close every transport, leave the
    /// registry empty. In-flight writes finish or time out first, since
    /// closing a transport waits on its writer, which a mid-write sender
    /// holds.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());

        let entries = self.shared.registry.clear().await;
        for entry in entries {
            let mut writer = entry.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(conn = %entry.id, error = %e, "transport close");
            }
        }

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "accept task join");
            }
        }

        let _ = std::fs::remove_file(&self.path);
        tracing::info!(path = %self.path.display(), "endpoint closed");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Some(task) = &self.accept_task {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("listener shutting down");
                return;
            }
            result = listener.accept() => {
                let stream = match result {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let shared = shared.clone();
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(handle_connection(stream, shared, shutdown));
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let id = ConnId(shared.next_conn.fetch_add(1, Ordering::Relaxed));
    let (mut read_half, write_half) = stream.into_split();

    shared.registry.add(ConnEntry::new(id, write_half)).await;
    tracing::info!(conn = %id, "connection accepted");

    // The first frame carries the peer's raw identity bytes. A peer that
    // stays silent is still registered; a later announcement can fill the
    // identity in.
    match tokio::time::timeout(shared.timeouts.handshake(), frame::read_frame(&mut read_half)).await
    {
        Ok(Ok(Some(payload))) => {
            let identity = String::from_utf8_lossy(&payload).into_owned();
            tracing::info!(conn = %id, identity, "peer identified");
            if let Err(e) = shared.registry.update_identity(id, &identity).await {
                tracing::warn!(conn = %id, error = %e, "identity update raced disconnect");
            }
        }
        Ok(Ok(None)) => {
            tracing::info!(conn = %id, "peer closed before identifying");
            disconnect(&shared, id).await;
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!(conn = %id, error = %e, "handshake read failed");
            disconnect(&shared, id).await;
            return;
        }
        Err(_) => {
            tracing::warn!(conn = %id, "no identity within handshake window");
        }
    }

    send_directory_to_all(&shared).await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(conn = %id, "read task shutting down");
                return;
            }
            result = frame::read_frame(&mut read_half) => match result {
                Ok(Some(payload)) => handle_frame(&shared, id, payload).await,
                Ok(None) => {
                    tracing::info!(conn = %id, "peer disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(conn = %id, error = %e, "read failed, dropping connection");
                    break;
                }
            }
        }
    }

    disconnect(&shared, id).await;
}

async fn handle_frame(shared: &Arc<Shared>, source: ConnId, payload: Bytes) {
    let msg = match codec::decode(&payload) {
        Ok(msg) => msg,
        Err(e) => {
            // Bad frame, live connection: drop the frame only.
            tracing::warn!(conn = %source, error = %e, "discarding malformed frame");
            return;
        }
    };

    match &msg.method {
        Method::Init | Method::WhoIs | Method::Ping => {
            on_announce(shared, source, &msg).await;
        }
        Method::MetaInfo => {
            // Directory snapshots flow coordinator → peer only.
            tracing::debug!(conn = %source, "ignoring directory snapshot from peer");
        }
        Method::Other(_) => {
            if msg.dest == Destination::Server {
                let _ = shared.event_tx.send(ServerEvent::Message(msg.clone()));
            }
        }
    }

    // Relay: forward the received bytes untouched, never back to the sender.
    if msg.dest == Destination::Broadcast {
        relay(shared, source, &payload).await;
    }
}

/// `Init`, `WhoIs`, and `Ping` all mean the same thing here: this peer's
/// current identity is `msg.sender_id`. Update it and push a fresh
/// directory to everyone.
async fn on_announce(shared: &Arc<Shared>, source: ConnId, msg: &Message) {
    tracing::debug!(
        conn = %source,
        method = msg.method.as_str(),
        sender = %msg.sender_id,
        "announcement"
    );

    match shared.registry.update_identity(source, &msg.sender_id).await {
        Ok(()) => send_directory_to_all(shared).await,
        Err(e) => {
            // The connection dropped between arrival and processing.
            tracing::error!(conn = %source, error = %e, "announcement dropped");
        }
    }
}

/// Build one directory snapshot, encode it once, and deliver the same
/// bytes to every registered connection. Each delivery fails on its own;
/// one wedged peer never stalls the rest.
async fn send_directory_to_all(shared: &Arc<Shared>) {
    let entries = shared.registry.snapshot().await;
    let ids: Vec<String> = entries.iter().map(|e| e.identity.clone()).collect();

    let payload = codec::encode(&Message::meta_info(&ids));

    for entry in &entries {
        if let Err(e) = send::send_frame(
            &shared.lock,
            &entry.writer,
            &payload,
            shared.timeouts.write(),
        )
        .await
        {
            tracing::error!(conn = %entry.id, error = %e, "directory delivery failed");
        }
    }

    let _ = shared.event_tx.send(ServerEvent::DirectoryChanged(ids));
}

async fn relay(shared: &Arc<Shared>, source: ConnId, payload: &Bytes) {
    for entry in shared.registry.snapshot().await {
        if entry.id == source {
            continue;
        }
        tracing::debug!(from = %source, to = %entry.id, "relaying broadcast frame");
        if let Err(e) = send::send_frame(
            &shared.lock,
            &entry.writer,
            payload,
            shared.timeouts.write(),
        )
        .await
        {
            tracing::error!(conn = %entry.id, error = %e, "relay delivery failed");
        }
    }
}

async fn disconnect(shared: &Arc<Shared>, id: ConnId) {
    if shared.registry.remove(id).await.is_none() {
        // Raced with explicit teardown.
        tracing::warn!(conn = %id, "connection already removed");
        return;
    }
    send_directory_to_all(shared).await;
}
