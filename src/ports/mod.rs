//! Ports layer: trait seams between the engine and its collaborators.

mod listener;
mod transport;

pub use listener::HandlerListener;
pub use transport::{Transport, TransportFactory};
