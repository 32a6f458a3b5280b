//! Named write lock — serializes frame writes on a channel.
//!
//! Frame writes may be issued from several logical senders at once (a relay
//! triggered by one peer while a directory push is in flight); unserialized
//! writes would interleave and corrupt framing for the receiver. Handles
//! created with the same name share one lock, so every writer on a channel
//! contends on the same resource no matter where it was constructed.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

static LOCKS: OnceLock<DashMap<String, Arc<Mutex<()>>>> = OnceLock::new();

fn table() -> &'static DashMap<String, Arc<Mutex<()>>> {
    LOCKS.get_or_init(DashMap::new)
}

/// Lock acquisition exceeded its bound. The write is reported as failed;
/// the caller logs and continues.
#[derive(Debug, thiserror::Error)]
#[error("write lock '{name}' not acquired within {timeout:?}")]
pub struct LockTimeout {
    name: String,
    timeout: Duration,
}

/// Handle to a named lock. Cheap to clone.
#[derive(Clone)]
pub struct WriteLock {
    name: String,
    inner: Arc<Mutex<()>>,
    timeout: Duration,
}

impl WriteLock {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        let name = name.into();
        let inner = table()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        Self {
            name,
            inner,
            timeout,
        }
    }

    /// Wait for exclusive ownership, bounded. The returned guard releases
    /// on drop, on every exit path.
    pub async fn acquire(&self) -> Result<WriteLockGuard, LockTimeout> {
        match tokio::time::timeout(self.timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => Ok(WriteLockGuard { _guard: guard }),
            Err(_) => Err(LockTimeout {
                name: self.name.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

pub struct WriteLockGuard {
    _guard: OwnedMutexGuard<()>,
}
