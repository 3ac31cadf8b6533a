use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::ProcessError;

/// End-to-end award latency target. Exceeding it is logged, never
/// aborted; the award still completes asynchronously.
pub const AWARD_SLA: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(attempt - 1)
    }
}

/// Tracks one event's wall-clock budget across stages.
pub struct SlaBudget {
    started: Instant,
    limit: Duration,
    overrun_logged: bool,
}

impl SlaBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            overrun_logged: false,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Warns once when the budget is blown, then lets the stage
    /// continue.
    pub fn note_stage(&mut self, stage: &str) {
        if self.exhausted() && !self.overrun_logged {
            self.overrun_logged = true;
            warn!(
                stage,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "award exceeded its latency budget, continuing"
            );
        }
    }
}

/// Runs a stage with exponential backoff. Only retryable errors are
/// retried; an exhausted SLA budget skips the remaining sleeps so a
/// slow award degrades to a single further attempt instead of stalling
/// a worker for the full schedule.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    budget: &mut SlaBudget,
    stage: &'static str,
    mut call: F,
) -> Result<T, ProcessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProcessError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => {
                budget.note_stage(stage);
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(stage, attempt, ?delay, error = %err, "stage failed, backing off");
                if !budget.exhausted() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => {
                budget.note_stage(stage);
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(2),
            factor: 2,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let mut budget = SlaBudget::new(AWARD_SLA);
        let result = with_backoff(fast_policy(), &mut budget, "persisting", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProcessError::Storage(anyhow::anyhow!("transient")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let mut budget = SlaBudget::new(AWARD_SLA);
        let result: Result<(), _> = with_backoff(fast_policy(), &mut budget, "caching", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProcessError::Cache(anyhow::anyhow!("down"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let mut budget = SlaBudget::new(AWARD_SLA);
        let result: Result<(), _> = with_backoff(fast_policy(), &mut budget, "resolving", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProcessError::MemberNotFound(uuid::Uuid::nil()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }
}
