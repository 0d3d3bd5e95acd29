//! Wire protocol layer: envelope extraction and event classification.

pub mod adapter;
pub mod envelope;
pub mod events;
pub mod tags;

pub use adapter::ProtocolAdapter;
pub use events::{DialogKind, ErrorKind, HandlerEvent};
