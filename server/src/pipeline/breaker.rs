use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::ProcessError;

pub const FAILURE_THRESHOLD: u32 = 5;
pub const RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Fails fast after repeated downstream failures; after the reset
/// timeout a single probe call is let through. One probe success closes
/// the breaker, a probe failure re-opens it.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str) -> Self {
        Self::with_settings(name, FAILURE_THRESHOLD, RESET_TIMEOUT)
    }

    pub fn with_settings(
        name: &'static str,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            name,
            failure_threshold,
            reset_timeout,
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Gate before a downstream call. While open (and while another
    /// probe is in flight) this returns `DownstreamUnavailable`.
    pub fn check(&self) -> Result<(), ProcessError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Closed { .. } => Ok(()),
            State::Open { since } if since.elapsed() >= self.reset_timeout => {
                info!(breaker = self.name, "half-open, letting one probe through");
                *state = State::HalfOpen;
                Ok(())
            }
            State::Open { .. } | State::HalfOpen => {
                Err(ProcessError::DownstreamUnavailable(self.name))
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, State::HalfOpen) {
            info!(breaker = self.name, "probe succeeded, closing");
        }
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(breaker = self.name, failures, "opening circuit");
                    *state = State::Open {
                        since: Instant::now(),
                    };
                } else {
                    *state = State::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            State::HalfOpen => {
                warn!(breaker = self.name, "probe failed, re-opening");
                *state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_five_consecutive_failures() {
        let breaker = CircuitBreaker::new("store");
        for _ in 0..4 {
            breaker.record_failure();
            assert!(breaker.check().is_ok());
        }
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(matches!(
            breaker.check(),
            Err(ProcessError::DownstreamUnavailable("store"))
        ));
    }

    #[test]
    fn a_success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new("store");
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_allows_exactly_one_probe() {
        let breaker = CircuitBreaker::with_settings("cache", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.is_open());

        // Reset timeout elapsed: first check is the probe, the next is
        // rejected until the probe reports back
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());

        breaker.record_success();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::with_settings("cache", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.check().is_ok());
        breaker.record_failure();
        assert!(breaker.is_open());
    }
}
