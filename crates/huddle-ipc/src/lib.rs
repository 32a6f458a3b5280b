//! huddle-ipc — same-host rendezvous channel for instances of one
//! application.
//!
//! One instance runs the coordinator ([`IpcServer`]); every instance,
//! including the coordinator's own process, joins as a peer
//! ([`IpcChannel`]). The coordinator keeps the directory of connected
//! peers and relays broadcasts between them. Which process takes the
//! coordinator role is the caller's decision.

pub mod channel;
pub mod frame;
pub mod lock;
pub mod registry;
pub mod send;
pub mod server;

pub use channel::{ChannelEvent, IpcChannel, PeerStatus};
pub use lock::{LockTimeout, WriteLock};
pub use registry::{ConnEntry, ConnId, Registry, RegistryError};
pub use send::SendError;
pub use server::{IpcError, IpcServer, ServerEvent};
