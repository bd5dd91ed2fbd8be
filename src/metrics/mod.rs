//! Prometheus metrics for the rotation controller
//!
//! This module exposes rotation counters, the reconcile duration histogram
//! and the health endpoints.

mod prometheus;

pub use prometheus::*;
