//! The serialized outbound write path.
//!
//! Display rows from the driver, keepalive pings and pong replies all share
//! one write half.  A frame is written in full while the lock is held, so two
//! writers can never interleave bytes of different frames.
//!
//! The first write failure detaches the stream and reports the I/O error once
//! on the per-link failure channel handed out by [`SharedWriter::attach`].
//! A write that makes no progress within the write timeout counts as a
//! failure, so a host that stops reading cannot hold the lock forever.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rembraille_core::protocol::encode_message;
use rembraille_core::BrailleMessage;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::infrastructure::network::transport::BoxedWriter;
use crate::infrastructure::network::SendError;

struct Link {
    writer: BoxedWriter,
    failed: Option<oneshot::Sender<io::Error>>,
}

/// Default bound on a single frame write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cloneable handle to the current connection's write half.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Option<Link>>>,
    write_timeout: Duration,
}

impl Default for SharedWriter {
    fn default() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }
}

impl SharedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            write_timeout,
        }
    }

    /// Installs the write half of a new connection, closing any previous one.
    ///
    /// The returned receiver resolves with the error of the first failed write.
    /// It resolves with `Err(RecvError)` if the link is detached normally.
    pub async fn attach(&self, writer: BoxedWriter) -> oneshot::Receiver<io::Error> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().await.replace(Link {
            writer,
            failed: Some(tx),
        });
        if let Some(mut old) = previous {
            warn!("replacing a write half that was never detached");
            let _ = old.writer.shutdown().await;
        }
        rx
    }

    /// Closes and drops the current write half, if any.
    pub async fn detach(&self) {
        let link = self.inner.lock().await.take();
        if let Some(mut link) = link {
            if let Err(e) = link.writer.shutdown().await {
                debug!("error while closing write half: {e}");
            }
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Encodes `msg` and writes the whole frame atomically.
    ///
    /// # Errors
    ///
    /// - [`SendError::NotConnected`] when no stream is attached.
    /// - [`SendError::Encode`] when the message does not fit in a frame.
    /// - [`SendError::LinkDown`] when the write fails or does not finish
    ///   within the write timeout; the stream is detached.
    pub async fn send(&self, msg: &BrailleMessage) -> Result<(), SendError> {
        let bytes = encode_message(msg)?;

        let mut guard = self.inner.lock().await;
        let link = guard.as_mut().ok_or(SendError::NotConnected)?;

        let write = async {
            link.writer.write_all(&bytes).await?;
            link.writer.flush().await
        };
        let result = match timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write stalled for {:?}", self.write_timeout),
            )),
        };

        if let Err(e) = result {
            warn!(message = ?msg.message_type(), "write failed, detaching link: {e}");
            if let Some(mut failed) = guard.take() {
                if let Some(tx) = failed.failed.take() {
                    let _ = tx.send(io::Error::new(e.kind(), e.to_string()));
                }
            }
            return Err(SendError::LinkDown(e));
        }
        Ok(())
    }
}
