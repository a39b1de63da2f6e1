//! Metrics export.
//!
//! Check results can be pushed to a Prometheus Push Gateway after a run.
//!
//! # Submodules
//!
//! - `prom` - Prometheus push integration

pub mod prom;
