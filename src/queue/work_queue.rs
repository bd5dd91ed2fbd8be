//! Rate-limited, deduplicating work queue of object keys

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Base delay of the per-key exponential rate limiter
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound of the per-key exponential rate limiter
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Queue of keys with at most one queued and one in-flight copy per key
///
/// A key added while it is being processed is held back and re-queued when
/// [`WorkQueue::done`] is called for it, so two workers never hold the same
/// key at once.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    /// Create a queue with the default rate limiter (5ms doubling, 1000s cap)
    pub fn new() -> Self {
        Self::with_rate_limiter(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    /// Create a queue whose rate limiter starts at `base_delay` and doubles up to `max_delay`
    pub fn with_rate_limiter(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                base_delay,
                max_delay,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key` unless a copy is already queued
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        {
            let mut state = self.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.inner.notify.notify_one();
    }

    /// Wait for the next key and mark it in flight
    ///
    /// Returns `None` once the queue has been shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release the in-flight marker of `key`
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Clear the retry counter of `key`
    pub fn forget(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    /// Number of rate-limited requeues recorded for `key`
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Enqueue `key` after `delay`, bypassing the rate limiter
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Enqueue `key` after its exponential backoff and bump its retry counter
    pub fn add_rate_limited(&self, key: impl Into<String>) {
        let key = key.into();
        let delay = self.next_delay(&key);
        self.add_after(key, delay);
    }

    fn next_delay(&self, key: &str) -> Duration {
        let mut state = self.lock();
        let failures = state.failures.entry(key.to_string()).or_insert(0);
        let exponent = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exponent)
            .and_then(|factor| self.inner.base_delay.checked_mul(factor))
            .map_or(self.inner.max_delay, |delay| delay.min(self.inner.max_delay))
    }

    /// Number of keys waiting to be picked up
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_adds_are_coalesced() {
        let queue = WorkQueue::new();
        queue.add("default/a");
        queue.add("default/a");
        queue.add("default/b");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
        assert_eq!(queue.get().await.as_deref(), Some("default/b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_in_flight_is_requeued_on_done() {
        let queue = WorkQueue::new();
        queue.add("default/a");
        let key = queue.get().await.unwrap();

        queue.add("default/a");
        assert!(queue.is_empty(), "in-flight key must not be handed out twice");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("default/a"));
    }

    #[test]
    fn get_waits_for_an_add() {
        let queue = WorkQueue::new();
        let mut get = tokio_test::task::spawn(queue.get());
        tokio_test::assert_pending!(get.poll());

        queue.add("default/a");
        assert!(get.is_woken());
        let key = tokio_test::assert_ready!(get.poll());
        assert_eq!(key.as_deref(), Some("default/a"));
    }

    #[tokio::test]
    async fn shut_down_releases_waiting_workers() {
        let queue = WorkQueue::new();
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(worker.await.unwrap(), None);

        queue.add("default/a");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_delivers_after_delay() {
        let queue = WorkQueue::new();
        queue.add_after("default/a", Duration::from_secs(10));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off_exponentially() {
        let queue = WorkQueue::with_rate_limiter(Duration::from_millis(5), Duration::from_millis(15));
        assert_eq!(queue.next_delay("k"), Duration::from_millis(5));
        assert_eq!(queue.next_delay("k"), Duration::from_millis(10));
        assert_eq!(queue.next_delay("k"), Duration::from_millis(15));
        assert_eq!(queue.next_delay("k"), Duration::from_millis(15));
        assert_eq!(queue.num_requeues("k"), 4);

        queue.forget("k");
        assert_eq!(queue.num_requeues("k"), 0);

        queue.add_rate_limited("k");
        assert_eq!(queue.num_requeues("k"), 1);
        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(queue.get().await.as_deref(), Some("k"));
    }

    #[test]
    fn huge_exponents_saturate_at_max_delay() {
        let queue = WorkQueue::new();
        queue.lock().failures.insert("k".to_string(), 64);
        assert_eq!(queue.next_delay("k"), DEFAULT_MAX_DELAY);
    }
}
