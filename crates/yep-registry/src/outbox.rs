//! Per-session write path: a bounded queue plus a writer task.
//!
//! Nothing but the writer task touches the connection's send half, so
//! enqueueing is the only thing a broadcaster ever waits on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use yep_transport::{Connection, TransportError};

use crate::DeliveryError;

/// An encoded server message, shared between every recipient of a broadcast.
pub type Frame = Arc<[u8]>;

/// Frames a session may have queued before further broadcasts are dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Longest a single network write may take before the writer gives up.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sending side of a session's queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Outbox {
    /// Queues a frame without waiting. Used by broadcasts.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queues a frame, waiting for room. Used for replies to the session's
    /// own client, which must not be dropped.
    pub async fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| DeliveryError::Closed)
    }

    /// Asks the writer to flush what is queued and close the connection.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns `true` once [`close`](Self::close) was called or the writer
    /// stopped on its own.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.tx.is_closed()
    }

    /// Resolves when the outbox is closed.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        tokio::select! {
            _ = shutdown_requested(&mut rx) => {}
            _ = self.tx.closed() => {}
        }
    }
}

/// Starts the writer task for `conn` and returns the outbox feeding it.
///
/// The writer ends when every [`Outbox`] clone is dropped, when the outbox
/// is closed (after flushing queued frames), or when a write fails or
/// exceeds `write_timeout`. In every case it closes the connection, which
/// in turn ends the session's read loop.
pub fn spawn_writer<C: Connection>(
    conn: Arc<C>,
    capacity: usize,
    write_timeout: Duration,
) -> (Outbox, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Frame>(capacity.max(1));
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let shutdown = Arc::new(shutdown);
    let outbox = Outbox {
        tx,
        shutdown: Arc::clone(&shutdown),
    };

    let handle = tokio::spawn(async move {
        let conn_id = conn.id();
        loop {
            tokio::select! {
                biased;
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write(conn.as_ref(), &frame, write_timeout).await {
                        tracing::warn!(%conn_id, error = %e, "write failed, stopping writer");
                        break;
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => {
                    rx.close();
                    while let Some(frame) = rx.recv().await {
                        if write(conn.as_ref(), &frame, write_timeout).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }

        shutdown.send_replace(true);
        if let Err(e) = conn.close().await {
            tracing::debug!(%conn_id, error = %e, "close after writer exit failed");
        }
        tracing::debug!(%conn_id, "writer stopped");
    });

    (outbox, handle)
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

async fn write<C: Connection>(
    conn: &C,
    frame: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    tokio::time::timeout(timeout, conn.send(frame))
        .await
        .map_err(|_| TransportError::WriteTimeout(timeout))?
}
