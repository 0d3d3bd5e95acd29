//! Transport adapters: the live WebSocket client, the in-memory mock, and
//! the connection driver that pumps either of them.

pub mod connection;
pub mod mock;
pub mod websocket;

pub use connection::Connection;
pub use websocket::{WebSocketTransport, WebSocketTransportFactory};
