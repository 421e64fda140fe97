//! In-memory test doubles shared across module test suites.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A [`Transport`] backed by in-memory queues instead of a real socket, so
/// handshake and session logic can be exercised without networking.
pub struct MockTransport {
    pub inbox: Mutex<VecDeque<Vec<u8>>>,
    pub outbox: Mutex<Vec<Vec<u8>>>,
    pub closed: Mutex<bool>,
}

impl MockTransport {
    pub fn new(inbox: Vec<Vec<u8>>) -> Self {
        Self {
            inbox: Mutex::new(inbox.into()),
            outbox: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outbox.lock().await.push(bytes);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.inbox
            .lock()
            .await
            .pop_front()
            .ok_or(TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        *self.closed.lock().await = true;
        Ok(())
    }
}
