//! Secrets Store rotation controller
//!
//! Periodically asks secret providers to re-mount the content of every
//! secrets-store CSI volume on the node, records the object versions they
//! report, and keeps the Kubernetes secrets synced from those mounts up to
//! date.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod queue;
pub mod reconcilers;

pub use error::{Error, Result};
