//! A time-sliced token bucket for admitting outbound calls to the upstream indexer.
//!
//! Refills happen lazily on each call based on wall-clock elapsed periods, rather than
//! with a background ticker, so the bucket has no cost when idle.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Outcome of [`TokenBucket::try_consume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The tokens were admitted.
    Admitted,
    /// Not enough tokens are available; retry after this long.
    WaitFor(Duration),
}

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// Fixed-capacity, periodically-refilled token bucket.
///
/// `capacity` bounds the burst size; `refill_rate` tokens are added every
/// `refill_period`. The bucket never holds more than `capacity` tokens.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    refill_period: Duration,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: u32, refill_period: Duration) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
            refill_period,
            state: Mutex::new(State {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 5 tokens/s, burst of 5, matching the upstream client's default.
    pub fn default_upstream() -> Self {
        Self::new(5, 5, Duration::from_secs(1))
    }

    fn refill_locked(&self, state: &mut State) {
        let elapsed = state.last_refill.elapsed();
        if elapsed.is_zero() {
            return;
        }
        let periods = elapsed.as_secs_f64() / self.refill_period.as_secs_f64();
        if periods <= 0.0 {
            return;
        }
        state.tokens = (state.tokens + periods * self.refill_rate).min(self.capacity);
        state.last_refill = Instant::now();
    }

    /// Attempt to atomically consume `n` tokens. Never blocks.
    pub fn try_consume(&self, n: u32) -> Admission {
        let n = n as f64;
        let mut state = self.state.lock();
        self.refill_locked(&mut state);

        if state.tokens >= n {
            state.tokens -= n;
            return Admission::Admitted;
        }

        let deficit = n - state.tokens;
        let periods_needed = deficit / self.refill_rate;
        let wait = Duration::from_secs_f64(periods_needed * self.refill_period.as_secs_f64());
        Admission::WaitFor(wait)
    }

    /// Block (async) until `n` tokens are available, then consume them.
    pub async fn wait_and_consume(&self, n: u32) {
        loop {
            match self.try_consume(n) {
                Admission::Admitted => return,
                Admission::WaitFor(wait) => {
                    tracing::trace!(?wait, tokens = n, "token bucket waiting");
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(5, 5, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(100));
        assert!(bucket.tokens() <= 5.0);
    }

    #[test]
    fn admits_up_to_capacity_then_blocks() {
        let bucket = TokenBucket::new(3, 1, Duration::from_secs(60));
        assert_eq!(bucket.try_consume(1), Admission::Admitted);
        assert_eq!(bucket.try_consume(1), Admission::Admitted);
        assert_eq!(bucket.try_consume(1), Admission::Admitted);
        match bucket.try_consume(1) {
            Admission::WaitFor(wait) => assert!(wait > Duration::ZERO),
            Admission::Admitted => panic!("bucket should be empty"),
        }
    }

    #[tokio::test]
    async fn wait_and_consume_eventually_succeeds() {
        let bucket = TokenBucket::new(1, 1, Duration::from_millis(20));
        bucket.wait_and_consume(1).await;
        // Bucket is now empty; this call must wait roughly one refill period.
        let start = Instant::now();
        bucket.wait_and_consume(1).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
