//! Connection registry — live peer connections and their last announced
//! identities.
//!
//! Mutations arrive from three concurrent event sources: the accept path,
//! every connection's read path, and the disconnect path. All operations go
//! through one mutex, held only for the duration of the table operation and
//! never across socket I/O.

use std::fmt;
use std::sync::Arc;

use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Listener-assigned identifier for one accepted transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One live connection: the transport write half plus the identity its peer
/// last announced (empty until the peer says who it is).
#[derive(Clone)]
pub struct ConnEntry {
    pub id: ConnId,
    pub identity: String,
    pub writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl ConnEntry {
    pub fn new(id: ConnId, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            identity: String::new(),
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The referenced connection is no longer present; its traffic raced
    /// a disconnect. Benign, the caller drops the message.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),
}

/// Insertion-ordered connection table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Vec<ConnEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry with unknown identity. Double insertion of the
    /// same transport is a guarded no-op.
    pub async fn add(&self, entry: ConnEntry) {
        let mut table = self.inner.lock().await;
        if table.iter().any(|e| e.id == entry.id) {
            tracing::warn!(conn = %entry.id, "connection already registered");
            return;
        }
        table.push(entry);
    }

    /// Remove an entry. Unknown ids are a no-op: disconnect notifications
    /// can race explicit teardown.
    pub async fn remove(&self, id: ConnId) -> Option<ConnEntry> {
        let mut table = self.inner.lock().await;
        let index = table.iter().position(|e| e.id == id)?;
        Some(table.remove(index))
    }

    /// Overwrite the stored identity for an existing entry.
    pub async fn update_identity(&self, id: ConnId, identity: &str) -> Result<(), RegistryError> {
        let mut table = self.inner.lock().await;
        match table.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.identity = identity.to_string();
                Ok(())
            }
            None => Err(RegistryError::UnknownConnection(id)),
        }
    }

    pub async fn find(&self, id: ConnId) -> Option<ConnEntry> {
        self.inner.lock().await.iter().find(|e| e.id == id).cloned()
    }

    /// Ordered snapshot, insertion order; the basis of directory ordering.
    pub async fn snapshot(&self) -> Vec<ConnEntry> {
        self.inner.lock().await.clone()
    }

    /// Identities only, insertion order.
    pub async fn identities(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|e| e.identity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Empty the table, returning the drained entries so the caller can
    /// close their transports.
    pub async fn clear(&self) -> Vec<ConnEntry> {
        std::mem::take(&mut *self.inner.lock().await)
    }
}
