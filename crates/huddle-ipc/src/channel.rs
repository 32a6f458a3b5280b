//! Peer role: connects to the rendezvous endpoint, announces an identity,
//! and surfaces directory changes and application messages.
//!
//! There is no reconnection logic. When the transport drops, the channel
//! emits [`ChannelEvent::Closed`] and is done; a new instance of the
//! channel must connect and announce afresh.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use huddle_core::codec;
use huddle_core::config::{socket_path, HuddleConfig, TimeoutConfig};
use huddle_core::message::{Destination, Message, Method};

use crate::frame;
use crate::lock::WriteLock;
use crate::send::{self, SendError};
use crate::server::IpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

/// Notifications a channel surfaces to the embedding application.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A peer joined or left the directory.
    Peer { id: String, status: PeerStatus },
    /// Current full directory, in coordinator order.
    Directory(Vec<String>),
    /// Application-level message received on this channel.
    Message(Message),
    /// The transport dropped. The channel is finished.
    Closed,
}

struct ReadCtx {
    identity: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    lock: WriteLock,
    timeouts: TimeoutConfig,
    peers: Arc<Mutex<Vec<String>>>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
}

/// One peer's connection to the endpoint.
pub struct IpcChannel {
    identity: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    lock: WriteLock,
    timeouts: TimeoutConfig,
    peers: Arc<Mutex<Vec<String>>>,
    read_task: JoinHandle<()>,
}

impl IpcChannel {
    /// Connect to the endpoint, hand over our identity, and announce.
    /// Returns the channel and its event stream.
    pub async fn connect(
        config: &HuddleConfig,
        identity: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), IpcError> {
        let identity = identity.into();
        let path = socket_path(&config.endpoint.name);

        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| IpcError::Connect {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), identity, "joined endpoint");

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let lock = WriteLock::new(&config.endpoint.name, config.timeouts.lock());
        let peers = Arc::new(Mutex::new(Vec::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // The first frame is the raw identity bytes, not an encoded message.
        send::send_frame(
            &lock,
            &writer,
            identity.as_bytes(),
            config.timeouts.write(),
        )
        .await?;

        let ctx = ReadCtx {
            identity: identity.clone(),
            writer: writer.clone(),
            lock: lock.clone(),
            timeouts: config.timeouts.clone(),
            peers: peers.clone(),
            event_tx,
        };
        let read_task = tokio::spawn(read_loop(read_half, ctx));

        let channel = Self {
            identity,
            writer,
            lock,
            timeouts: config.timeouts.clone(),
            peers,
            read_task,
        };

        channel.send(Message::init(&channel.identity)).await?;

        Ok((channel, event_rx))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Last directory snapshot received from the coordinator.
    pub async fn peers(&self) -> Vec<String> {
        self.peers.lock().await.clone()
    }

    /// Encode and send one message.
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        let payload = codec::encode(&msg);
        send::send_frame(&self.lock, &self.writer, &payload, self.timeouts.write()).await
    }

    /// Send an application message to every other peer.
    pub async fn broadcast(&self, method: &str, args: Vec<String>) -> Result<(), SendError> {
        self.send(Message {
            sender_id: self.identity.clone(),
            dest: Destination::Broadcast,
            method: Method::from(method),
            args,
        })
        .await
    }

    /// Liveness plus identity re-announcement; refreshes the directory.
    pub async fn ping(&self) -> Result<(), SendError> {
        self.send(Message::ping(&self.identity)).await
    }

    /// Close the transport. The read task ends with it.
    pub async fn close(self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "transport close");
        }
        // dropping self aborts the read task
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, ctx: ReadCtx) {
    loop {
        match frame::read_frame(&mut reader).await {
            Ok(Some(payload)) => handle_incoming(&ctx, payload).await,
            Ok(None) => {
                tracing::info!("endpoint closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel read failed");
                break;
            }
        }
    }
    let _ = ctx.event_tx.send(ChannelEvent::Closed);
}

async fn handle_incoming(ctx: &ReadCtx, payload: Bytes) {
    let msg = match codec::decode(&payload) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "discarding malformed frame");
            return;
        }
    };

    match msg.method {
        Method::MetaInfo => on_directory(ctx, &msg).await,
        Method::WhoIs => {
            // Identity query from the coordinator; answer on this transport.
            let payload = codec::encode(&Message::whois(&ctx.identity));
            if let Err(e) =
                send::send_frame(&ctx.lock, &ctx.writer, &payload, ctx.timeouts.write()).await
            {
                tracing::error!(error = %e, "whois reply failed");
            }
        }
        Method::Init | Method::Ping => {
            tracing::debug!(sender = %msg.sender_id, "peer announcement");
        }
        Method::Other(_) => {
            let _ = ctx.event_tx.send(ChannelEvent::Message(msg));
        }
    }
}

async fn on_directory(ctx: &ReadCtx, msg: &Message) {
    let Some(ids) = msg.directory() else {
        tracing::warn!(args = ?msg.args, "directory snapshot with inconsistent count");
        return;
    };

    let previous = {
        let mut peers = ctx.peers.lock().await;
        std::mem::replace(&mut *peers, ids.clone())
    };

    // Peers that have not yet announced show up with an empty identity;
    // there is nothing to report about them until they have a name.
    for id in ids.iter().filter(|id| !id.is_empty() && !previous.contains(id)) {
        let _ = ctx.event_tx.send(ChannelEvent::Peer {
            id: id.clone(),
            status: PeerStatus::Connected,
        });
    }
    for id in previous.iter().filter(|id| !id.is_empty() && !ids.contains(id)) {
        let _ = ctx.event_tx.send(ChannelEvent::Peer {
            id: id.clone(),
            status: PeerStatus::Disconnected,
        });
    }

    let _ = ctx.event_tx.send(ChannelEvent::Directory(ids));
}
