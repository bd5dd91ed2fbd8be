//! Rotation controller
//!
//! A poll loop discovers the pod statuses of the local node and feeds their
//! keys into a work queue; workers pull keys and run the rotation pipeline.

mod rotation_controller;

pub use rotation_controller::RotationController;

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{EventSink, ObjectStore};
use crate::queue::RetryPolicy;
use crate::reconcilers::Reconciler;

/// Shared context of the scheduler and the workers
pub struct Context {
    /// Cache of pod statuses, pods, classes and secrets
    pub store: Arc<dyn ObjectStore>,
    /// Sink for pod events
    pub events: Arc<dyn EventSink>,
    /// Rotation pipeline
    pub reconciler: Reconciler,
}

impl Context {
    /// Create a new context
    pub fn new(store: Arc<dyn ObjectStore>, events: Arc<dyn EventSink>, reconciler: Reconciler) -> Self {
        Self {
            store,
            events,
            reconciler,
        }
    }
}

/// Scheduling knobs of the rotation controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Interval between two discovery passes
    pub poll_interval: Duration,
    /// Number of worker tasks
    pub workers: usize,
    /// Requeue policy after failed attempts
    pub retry: RetryPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            workers: 1,
            retry: RetryPolicy::default(),
        }
    }
}
