//! In-process connection double for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use yep_transport::{Connection, ConnectionId, TransportError};

/// Records every frame written to it. A stalled connection never finishes
/// a write.
pub(crate) struct MockConnection {
    id: ConnectionId,
    stalled: bool,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl MockConnection {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id: ConnectionId::new(id),
            stalled: false,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn stalled(id: u64) -> Self {
        Self {
            stalled: true,
            ..Self::new(id)
        }
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed("mock closed".into()));
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
