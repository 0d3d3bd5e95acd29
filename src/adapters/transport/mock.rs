//! Scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::domain::foundation::EngineError;
use crate::ports::{Transport, TransportFactory};

/// Maps each outbound message to the inbound messages the "server" answers
/// with.
pub type Responder = dyn Fn(&Value) -> Vec<Value> + Send + Sync;

/// In-memory transport fed by a script and/or a responder function.
pub struct MockTransport {
    inbound: Mutex<VecDeque<Value>>,
    sent: Mutex<Vec<Value>>,
    notify: Notify,
    closed: AtomicBool,
    responder: Option<Arc<Responder>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            responder: None,
        }
    }

    /// Creates a transport that answers sends through `responder`.
    pub fn with_responder(responder: Arc<Responder>) -> Self {
        Self {
            responder: Some(responder),
            ..Self::new()
        }
    }

    /// Queues an unsolicited inbound message.
    pub fn push_inbound(&self, message: Value) {
        self.inbound
            .lock()
            .expect("MockTransport: inbound lock poisoned")
            .push_back(message);
        self.notify.notify_one();
    }

    /// Everything the client sent so far.
    pub fn sent_messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .expect("MockTransport: sent lock poisoned")
            .clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: Value) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::connection("mock transport closed"));
        }
        let responses = self.responder.as_ref().map(|r| r(&message));
        self.sent
            .lock()
            .expect("MockTransport: sent lock poisoned")
            .push(message);
        if let Some(responses) = responses {
            for response in responses {
                self.push_inbound(response);
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Value>, EngineError> {
        loop {
            if let Some(message) = self
                .inbound
                .lock()
                .expect("MockTransport: inbound lock poisoned")
                .pop_front()
            {
                return Ok(Some(message));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.notify.notified().await;
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Factory handing out scripted transports and counting connects, so tests
/// can assert the one-transport-per-top-level-open policy.
pub struct MockTransportFactory {
    responder: Arc<Responder>,
    connects: AtomicUsize,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self {
            responder,
            connects: AtomicUsize::new(0),
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Number of transports handed out so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The most recently connected transport.
    pub fn last_transport(&self) -> Option<Arc<MockTransport>> {
        self.transports
            .lock()
            .expect("MockTransportFactory: lock poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(&self) -> Result<Box<dyn Transport>, EngineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(MockTransport::with_responder(self.responder.clone()));
        self.transports
            .lock()
            .expect("MockTransportFactory: lock poisoned")
            .push(transport.clone());
        Ok(Box::new(SharedTransport(transport)))
    }
}

/// Box-able wrapper so the factory can keep a handle to the transport it
/// hands out.
struct SharedTransport(Arc<MockTransport>);

#[async_trait]
impl Transport for SharedTransport {
    async fn send(&self, message: Value) -> Result<(), EngineError> {
        self.0.send(message).await
    }
    async fn receive(&self) -> Result<Option<Value>, EngineError> {
        self.0.receive().await
    }
    async fn close(&self) {
        self.0.close().await;
    }
}
