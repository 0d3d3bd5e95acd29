//! Error types for the protocol engine.

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// The taxonomy matters to callers in two places: decode failures are
/// per-message and never fatal to the adapter, and a failed wait must say
/// whether it timed out or was cancelled.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A compressed payload was present but could not be decoded.
    #[error("Payload decode failed at {stage}: {reason}")]
    Decode { stage: DecodeStage, reason: String },

    /// A `wait_for` elapsed without a matching event.
    #[error("Wait timed out after {waited_ms}ms")]
    WaitTimeout { waited_ms: u64 },

    /// A `wait_for` was cancelled through its cancellation token.
    #[error("Wait was cancelled")]
    WaitCancelled,

    /// The transport could not be established or broke mid-conversation.
    /// Retry policy belongs to the caller, never to the engine.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A response did not have the shape the protocol requires.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The requested pool session does not exist or has expired.
    #[error("Session '{0}' not found")]
    SessionNotFound(String),
}

/// Stage of payload decoding at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Base64,
    Gzip,
    Utf8,
    Json,
    /// Decoded JSON was not the required array of handler records.
    Shape,
}

impl std::fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecodeStage::Base64 => "base64",
            DecodeStage::Gzip => "gzip",
            DecodeStage::Utf8 => "utf-8",
            DecodeStage::Json => "json",
            DecodeStage::Shape => "shape",
        };
        write!(f, "{}", s)
    }
}

impl EngineError {
    /// Creates a decode error for the given stage.
    pub fn decode(stage: DecodeStage, reason: impl Into<String>) -> Self {
        EngineError::Decode {
            stage,
            reason: reason.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(reason: impl Into<String>) -> Self {
        EngineError::Connection(reason.into())
    }

    /// Creates a protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        EngineError::Protocol(reason.into())
    }

    /// True when this is a decode failure (per-message, non-fatal).
    pub fn is_decode(&self) -> bool {
        matches!(self, EngineError::Decode { .. })
    }

    /// True when this wait failure was a timeout rather than a cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::WaitTimeout { .. })
    }

    /// True when this wait failure was a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::WaitCancelled)
    }
}
