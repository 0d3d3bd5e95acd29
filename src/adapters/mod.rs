//! Concrete implementations of the ports.

pub mod events;
pub mod session;
pub mod transport;
