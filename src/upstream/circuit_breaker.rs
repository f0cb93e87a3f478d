//! Fail-open/closed/half-open circuit breaker guarding calls to the upstream indexer.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe circuit breaker: `Closed -> Open` after `failure_threshold` consecutive
/// failures, `Open -> HalfOpen` after `recovery_timeout`, and `HalfOpen -> {Closed, Open}`
/// on the result of the single probe call it admits.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// F=5, T=30s, the spec defaults.
    pub fn default_upstream() -> Self {
        Self::new(5, Duration::from_secs(30))
    }

    /// Returns true if a call may proceed right now, transitioning `Open -> HalfOpen`
    /// in place if the recovery timeout has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    tracing::info!("circuit breaker: admitting half-open probe");
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            },
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state != State::Closed {
            tracing::info!("circuit breaker: closing after successful probe");
        }
        inner.state = State::Closed;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                tracing::warn!("circuit breaker: probe failed, reopening");
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            },
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker: opening"
                    );
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            },
            State::Open => {},
        }
    }

    /// Run `f` through the breaker. Fails fast with [`AppError::CircuitOpen`] without
    /// invoking `f` at all if the circuit is open.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        if !self.admit() {
            return Err(AppError::CircuitOpen);
        }
        match f().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            },
            Err(e) => {
                self.record_failure();
                Err(e.into())
            },
        }
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.inner.lock().state == State::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            let res: Result<(), AppError> = breaker
                .call(|| async { Err::<(), AppError>(AppError::UpstreamUnavailable { reason: "probe failed".to_owned() }) })
                .await;
            assert!(res.is_err());
        }
        assert!(breaker.is_open());

        // Next call fails fast without invoking the closure.
        let mut invoked = false;
        let res = breaker
            .call(|| {
                invoked = true;
                async { Ok::<(), AppError>(()) }
            })
            .await;
        assert!(matches!(res, Err(AppError::CircuitOpen)));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        let _ = breaker
            .call(|| async { Err::<(), AppError>(AppError::UpstreamUnavailable { reason: "probe failed".to_owned() }) })
            .await;
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(20)).await;

        let res = breaker.call(|| async { Ok::<(), AppError>(()) }).await;
        assert!(res.is_ok());
        assert!(!breaker.is_open());
    }
}
