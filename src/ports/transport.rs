//! Transport ports - the seam between the engine and the wire.
//!
//! The engine never performs login itself: an external authentication
//! collaborator configures a [`TransportFactory`] with ready-to-use
//! credentials, and the connection layer asks it for a fresh transport
//! whenever the open-page policy requires one.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::foundation::EngineError;

/// One established wire connection carrying JSON messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one outbound message.
    async fn send(&self, message: Value) -> Result<(), EngineError>;

    /// Receives the next inbound message; `None` once the peer closed.
    async fn receive(&self) -> Result<Option<Value>, EngineError>;

    /// Closes the connection. Idempotent.
    async fn close(&self);
}

/// Builds fresh transports.
///
/// Top-level page opens always request a new transport (the server caches
/// form state per connection), so the factory is consulted repeatedly over
/// one session's lifetime.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Establishes a new transport.
    ///
    /// # Errors
    ///
    /// `EngineError::Connection` when the endpoint is unreachable or the
    /// handshake fails. The engine does not retry; retry policy belongs to
    /// the caller.
    async fn connect(&self) -> Result<Box<dyn Transport>, EngineError>;
}
