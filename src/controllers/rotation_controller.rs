//! Poll loop, workers and reporting of the rotation controller

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Context, ControllerSettings};
use crate::metrics;
use crate::queue::{AttemptOutcome, RetryDecision, WorkQueue};
use crate::reconcilers::RotationOutcome;

/// Periodically rotates the mounts of every pod status on the node
#[derive(Clone)]
pub struct RotationController {
    context: Arc<Context>,
    queue: WorkQueue,
    settings: ControllerSettings,
}

impl RotationController {
    /// Create a controller with an empty queue
    pub fn new(context: Arc<Context>, settings: ControllerSettings) -> Self {
        Self {
            context,
            queue: WorkQueue::new(),
            settings,
        }
    }

    /// Queue feeding the workers
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run until `shutdown` is cancelled
    ///
    /// The first discovery pass happens one poll interval after start. On
    /// cancellation the queue is shut down and in-flight reconciles are
    /// allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            workers = self.settings.workers,
            "Starting rotation controller"
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.settings.workers {
            let controller = self.clone();
            workers.spawn(async move {
                while controller.process_next_item().await {}
                debug!(worker, "Rotation worker stopped");
            });
        }

        let period = self.settings.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.enqueue_local_statuses().await;
                }
            }
        }

        info!("Stopping rotation controller, draining workers");
        self.queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Rotation worker panicked");
            }
        }
        info!("Rotation controller stopped");
    }

    /// Queue every pod status of the local node, returning how many were listed
    ///
    /// A listing failure is logged and the next tick tries again.
    pub async fn enqueue_local_statuses(&self) -> usize {
        match self.context.store.list_local_statuses().await {
            Ok(statuses) => {
                for status in &statuses {
                    self.queue.add(status.key());
                }
                metrics::ROTATION_QUEUE_DEPTH.set(self.queue.len() as f64);
                debug!(count = statuses.len(), "Queued pod statuses for rotation");
                statuses.len()
            }
            Err(e) => {
                error!(error = %e, "Failed to list pod statuses for node");
                0
            }
        }
    }

    /// Process one key; returns false once the queue is shut down
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let attempt = match self.context.store.get_status(&key).await {
            Ok(status) => {
                debug!(key = %key, "Reconciler started");
                let outcome = self.context.reconciler.reconcile(&status).await;
                self.report(&outcome).await;
                debug!(key = %key, stage = ?outcome.stage, "Reconciler completed");
                outcome.attempt_outcome()
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, error = %e, "Pod status not found in cache");
                AttemptOutcome::NotFound
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to get pod status");
                AttemptOutcome::Failed
            }
        };

        match self.settings.retry.apply(&self.queue, &key, attempt) {
            RetryDecision::Drop => info!(key = %key, "Retry budget exceeded, dropping from queue"),
            RetryDecision::RequeueAfter(delay) => {
                debug!(key = %key, delay_secs = delay.as_secs(), "Requeued after failure")
            }
            RetryDecision::Forget | RetryDecision::RateLimited => {}
        }
        self.queue.done(&key);
        metrics::ROTATION_QUEUE_DEPTH.set(self.queue.len() as f64);
        true
    }

    /// Publish the events and metrics of a finished attempt
    pub async fn report(&self, outcome: &RotationOutcome) {
        let provider = outcome.provider_label();
        match &outcome.result {
            Ok(()) => metrics::record_rotation(provider, outcome.requires_update, outcome.elapsed),
            Err(e) => metrics::record_rotation_error(provider, e.reason(), outcome.requires_update),
        }

        let Some(pod) = &outcome.pod else {
            return;
        };
        for event in &outcome.events {
            if let Err(e) = self
                .context
                .events
                .emit(pod, event.kind, event.reason, &event.message)
                .await
            {
                warn!(key = %outcome.key, reason = event.reason, error = %e, "Failed to publish event");
            }
        }
    }
}
