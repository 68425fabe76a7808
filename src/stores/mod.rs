//! Store implementations for the shared cache.

pub mod memory;
pub mod metrics;
pub mod moka;
