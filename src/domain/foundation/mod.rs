//! Foundation types shared across the domain layer.

mod errors;
pub mod json_scan;

pub use errors::{DecodeStage, EngineError};
