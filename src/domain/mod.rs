//! Domain layer: pure protocol and page-state logic, no I/O.

pub mod foundation;
pub mod page;
pub mod protocol;
