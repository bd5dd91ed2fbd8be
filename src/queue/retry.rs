//! Requeue decision after a reconcile attempt

use std::time::Duration;

use super::WorkQueue;

/// Classification of a finished reconcile attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// The tracked status vanished from the cache
    NotFound,
    Failed,
}

/// What to do with a key after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Clear the retry counter
    Forget,
    /// Requeue through the rate limiter
    RateLimited,
    /// Requeue after a fixed delay
    RequeueAfter(Duration),
    /// Retry budget exhausted: forget the key without requeueing
    Drop,
}

/// Classified retry policy of the rotation queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Rate-limited retries allowed for not-found failures
    pub max_requeues: u32,
    /// Delay before retrying any other failure
    pub requeue_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_requeues: 5,
            requeue_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Decide how to requeue a key that has already been requeued `num_requeues` times
    pub fn decide(&self, outcome: AttemptOutcome, num_requeues: u32) -> RetryDecision {
        match outcome {
            AttemptOutcome::Success => RetryDecision::Forget,
            AttemptOutcome::NotFound if num_requeues < self.max_requeues => {
                RetryDecision::RateLimited
            }
            AttemptOutcome::NotFound => RetryDecision::Drop,
            AttemptOutcome::Failed => RetryDecision::RequeueAfter(self.requeue_delay),
        }
    }

    /// Decide for `key` and apply the decision to `queue`
    pub fn apply(&self, queue: &WorkQueue, key: &str, outcome: AttemptOutcome) -> RetryDecision {
        let decision = self.decide(outcome, queue.num_requeues(key));
        match decision {
            RetryDecision::Forget | RetryDecision::Drop => queue.forget(key),
            RetryDecision::RateLimited => queue.add_rate_limited(key),
            RetryDecision::RequeueAfter(delay) => queue.add_after(key, delay),
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_forgets() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(AttemptOutcome::Success, 3), RetryDecision::Forget);
    }

    #[test]
    fn not_found_is_rate_limited_until_budget_is_spent() {
        let policy = RetryPolicy::default();
        for n in 0..5 {
            assert_eq!(policy.decide(AttemptOutcome::NotFound, n), RetryDecision::RateLimited);
        }
        assert_eq!(policy.decide(AttemptOutcome::NotFound, 5), RetryDecision::Drop);
        assert_eq!(policy.decide(AttemptOutcome::NotFound, 6), RetryDecision::Drop);
    }

    #[test]
    fn other_failures_use_the_fixed_delay_forever() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(AttemptOutcome::Failed, 0),
            RetryDecision::RequeueAfter(Duration::from_secs(10))
        );
        assert_eq!(
            policy.decide(AttemptOutcome::Failed, 1_000),
            RetryDecision::RequeueAfter(Duration::from_secs(10))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_key_is_dropped_after_five_requeues() {
        let policy = RetryPolicy::default();
        let queue = WorkQueue::new();
        let key = "default/pod-a-default-spc-1";

        let mut requeues = 0;
        loop {
            match policy.apply(&queue, key, AttemptOutcome::NotFound) {
                RetryDecision::RateLimited => requeues += 1,
                RetryDecision::Drop => break,
                other => panic!("unexpected decision {:?}", other),
            }
        }

        assert_eq!(requeues, 5);
        assert_eq!(queue.num_requeues(key), 0);
    }
}
