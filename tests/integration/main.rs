//! huddle integration test harness.
//!
//! Every test runs a real coordinator and real peers over a Unix socket in
//! the runtime/temp directory. Each test gets its own endpoint name, so
//! tests never share a socket and can run in parallel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc::UnboundedReceiver;

use huddle_core::codec;
use huddle_core::config::{socket_path, HuddleConfig};
use huddle_core::message::Message;
use huddle_ipc::{frame, ChannelEvent, PeerStatus, ServerEvent};

mod directory;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const EVENT_WAIT: Duration = Duration::from_secs(5);

static NEXT_ENDPOINT: AtomicU64 = AtomicU64::new(0);

/// A config with a unique endpoint name for this test.
pub fn test_config(tag: &str) -> HuddleConfig {
    let n = NEXT_ENDPOINT.fetch_add(1, Ordering::Relaxed);
    let mut config = HuddleConfig::default();
    config.endpoint.name = format!("huddle-test-{}-{}-{}", tag, std::process::id(), n);
    config
}

/// Drain channel events until the directory matches `expected`.
pub async fn wait_for_directory(
    events: &mut UnboundedReceiver<ChannelEvent>,
    expected: &[&str],
) {
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    let mut last: Option<Vec<String>> = None;
    let result = tokio::time::timeout(EVENT_WAIT, async {
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Directory(ids) = event {
                if ids == expected {
                    return;
                }
                last = Some(ids);
            }
        }
        panic!("event stream ended before directory {expected:?}");
    })
    .await;
    if result.is_err() {
        panic!("timed out waiting for directory {expected:?} (last seen {last:?})");
    }
}

/// Drain channel events until a specific peer status change arrives.
pub async fn wait_for_peer(
    events: &mut UnboundedReceiver<ChannelEvent>,
    peer: &str,
    status: PeerStatus,
) {
    tokio::time::timeout(EVENT_WAIT, async {
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Peer { id, status: got } = event {
                if id == peer && got == status {
                    return;
                }
            }
        }
        panic!("event stream ended before peer '{peer}' reached {status:?}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for peer '{peer}' to reach {status:?}"));
}

/// Next application-level message on a channel.
pub async fn next_app_message(events: &mut UnboundedReceiver<ChannelEvent>) -> Message {
    tokio::time::timeout(EVENT_WAIT, async {
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Message(msg) = event {
                return msg;
            }
        }
        panic!("event stream ended without an application message");
    })
    .await
    .expect("timed out waiting for an application message")
}

/// Assert no application message arrives within `window`.
pub async fn assert_no_app_message(events: &mut UnboundedReceiver<ChannelEvent>, window: Duration) {
    let result = tokio::time::timeout(window, async {
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Message(msg) = event {
                return msg;
            }
        }
        std::future::pending().await
    })
    .await;
    if let Ok(msg) = result {
        panic!("unexpected application message: {msg:?}");
    }
}

/// Drain channel events until the channel reports it is finished.
pub async fn wait_for_closed(events: &mut UnboundedReceiver<ChannelEvent>) {
    tokio::time::timeout(EVENT_WAIT, async {
        while let Some(event) = events.recv().await {
            if matches!(event, ChannelEvent::Closed) {
                return;
            }
        }
        // sender dropped entirely, which is also a closed channel
    })
    .await
    .expect("timed out waiting for the channel to close");
}

/// Next application message surfaced on the coordinator's own event stream.
pub async fn next_server_message(events: &mut UnboundedReceiver<ServerEvent>) -> Message {
    tokio::time::timeout(EVENT_WAIT, async {
        while let Some(event) = events.recv().await {
            if let ServerEvent::Message(msg) = event {
                return msg;
            }
        }
        panic!("server event stream ended without a message");
    })
    .await
    .expect("timed out waiting for a server-destined message")
}

// ── Raw peer ──────────────────────────────────────────────────────────────────

/// A peer speaking the wire format by hand, for byte-level assertions the
/// channel API would hide.
pub struct RawPeer {
    pub stream: UnixStream,
}

impl RawPeer {
    pub async fn connect(config: &HuddleConfig, identity: &str) -> RawPeer {
        let path = socket_path(&config.endpoint.name);
        let mut stream = UnixStream::connect(&path).await.expect("raw connect");
        frame::write_frame(&mut stream, identity.as_bytes())
            .await
            .expect("raw handshake");
        RawPeer { stream }
    }

    pub async fn send_raw(&mut self, payload: &[u8]) {
        frame::write_frame(&mut self.stream, payload)
            .await
            .expect("raw write");
    }

    /// Write bytes below the framing layer, corrupt prefixes included.
    pub async fn send_unframed(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("unframed write");
        self.stream.flush().await.expect("unframed flush");
    }

    /// Read frames until a directory snapshot matching `expected` arrives.
    pub async fn wait_for_directory(&mut self, expected: &[&str]) {
        let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        tokio::time::timeout(EVENT_WAIT, async {
            loop {
                let payload = frame::read_frame(&mut self.stream)
                    .await
                    .expect("raw read")
                    .expect("unexpected end of stream");
                if let Ok(msg) = codec::decode(&payload) {
                    if let Some(ids) = msg.directory() {
                        if ids == expected {
                            return;
                        }
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for raw directory {expected:?}"));
    }

    /// Next frame that is not a directory push, as raw bytes.
    pub async fn next_non_directory_frame(&mut self) -> Bytes {
        tokio::time::timeout(EVENT_WAIT, async {
            loop {
                let payload = frame::read_frame(&mut self.stream)
                    .await
                    .expect("raw read")
                    .expect("unexpected end of stream");
                match codec::decode(&payload) {
                    Ok(msg) if msg.directory().is_some() => continue,
                    _ => return payload,
                }
            }
        })
        .await
        .expect("timed out waiting for a relayed frame")
    }
}
