//! Formwire - Client Engine for a Compressed Form-Streaming Protocol
//!
//! This crate implements the client side of a stateful WebSocket UI
//! protocol: envelope decompression, handler classification, a predicate
//! event bus, a page state model with virtualization-aware grids, and a
//! pooled session layer over per-page connections.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
