//! Lock-guarded, time-bounded frame delivery.
//!
//! Every outgoing frame goes through [`send_frame`]: acquire the channel's
//! write lock, write within the bound, release. A failure here is a failed
//! delivery to one peer, never a reason to abort deliveries to others.

use std::time::Duration;

use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::frame;
use crate::lock::{LockTimeout, WriteLock};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("write not completed within {0:?}")]
    WriteTimeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write one frame to a transport under the channel's write lock.
pub async fn send_frame(
    lock: &WriteLock,
    writer: &Mutex<OwnedWriteHalf>,
    payload: &[u8],
    write_timeout: Duration,
) -> Result<(), SendError> {
    let _guard = lock.acquire().await?;
    let mut writer = writer.lock().await;
    match tokio::time::timeout(write_timeout, frame::write_frame(&mut *writer, payload)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendError::Io(e)),
        Err(_) => Err(SendError::WriteTimeout(write_timeout)),
    }
}
