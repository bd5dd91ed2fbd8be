//! Bounded exponential backoff for in-place write retries

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Retry schedule: `steps` attempts, starting at `duration`, growing by `factor`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts
    pub steps: u32,
    /// Delay before the second attempt
    pub duration: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: f64,
    /// Fraction of the delay added as random jitter
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 5,
            duration: Duration::from_millis(1),
            factor: 1.0,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// Delay to wait before retrying, advancing the schedule
    fn step(&mut self) -> Duration {
        let mut delay = self.duration;
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..1.0) * self.jitter;
            delay += self.duration.mul_f64(extra);
        }
        if self.factor > 0.0 {
            self.duration = self.duration.mul_f64(self.factor);
        }
        delay
    }
}

/// Run `op` until it succeeds or the backoff's attempts are used up
///
/// The error of the final attempt is returned on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut>(mut backoff: Backoff, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= backoff.steps => return Err(e),
            Err(e) => {
                let delay = backoff.step();
                debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_the_operation_recovers() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(Backoff::default(), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("conflict {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_all_steps_with_last_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(Backoff::default(), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("conflict {}", n))
        })
        .await;

        assert_eq!(result, Err("conflict 5".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff {
            steps: 3,
            duration: Duration::from_millis(100),
            factor: 2.0,
            jitter: 0.1,
        };
        let first = backoff.step();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        let second = backoff.step();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
    }
}
