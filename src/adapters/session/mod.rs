//! Session pooling over connections.

pub mod pool;

pub use pool::{SessionHandle, SessionKey, SessionPool};
