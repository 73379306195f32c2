//! In-memory collectors and transports for testing purpose.

/// Structs used for testing the trace pipeline
pub mod trace;

/// Structs used for testing the metrics pipeline
pub mod metrics;

pub use crate::trace::IncrementIdGenerator;
