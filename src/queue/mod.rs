//! Work queue, retry policy and bounded local retries
//!
//! The scheduler and the workers share nothing but the [`WorkQueue`]. The
//! [`RetryPolicy`] decides how a key goes back into the queue after a
//! reconcile attempt; [`retry_with_backoff`] covers the short in-place
//! retries of individual writes.

mod backoff;
mod retry;
mod work_queue;

pub use backoff::{retry_with_backoff, Backoff};
pub use retry::{AttemptOutcome, RetryDecision, RetryPolicy};
pub use work_queue::WorkQueue;
