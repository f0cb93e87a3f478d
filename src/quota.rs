//! Cost Rate Limiter (§4.7): a per-caller sliding-window budget keyed by a
//! cost table, so a single expensive graph query counts for more than a
//! cheap account lookup.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::AppError;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_BUDGET: u64 = 100;

/// Operation kinds the cost table prices. New operations should be added here
/// rather than threaded through as raw integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GraphQuery,
    Search,
    AccountFetch,
    Save,
}

impl Operation {
    pub fn cost(self) -> u64 {
        match self {
            Operation::GraphQuery => 50,
            Operation::Search => 10,
            Operation::AccountFetch => 5,
            Operation::Save => 20,
        }
    }
}

struct Admission {
    cost: u64,
    at: DateTime<Utc>,
}

#[derive(Default)]
struct CallerState {
    admissions: Vec<Admission>,
}

/// Per-caller sliding-window limiter. One instance is shared across the
/// service; callers are distinguished by an opaque identity string (source IP
/// or API key).
pub struct CostRateLimiter {
    window: Duration,
    budget: u64,
    callers: Mutex<HashMap<String, CallerState>>,
}

impl CostRateLimiter {
    pub fn new(window: Duration, budget: u64) -> Self {
        Self {
            window,
            budget,
            callers: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_limiter() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_BUDGET)
    }

    /// Expires entries older than the window, sums what remains, and admits
    /// iff `sum + cost <= budget`. On success, appends `{cost, now}`.
    pub fn admit(&self, caller: &str, operation: Operation) -> Result<(), AppError> {
        let cost = operation.cost();
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.window).expect("window fits in chrono::Duration");

        let mut callers = self.callers.lock();
        let state = callers.entry(caller.to_owned()).or_default();
        state.admissions.retain(|a| now - a.at < window);

        let used: u64 = state.admissions.iter().map(|a| a.cost).sum();
        if used + cost > self.budget {
            let reset_at = state
                .admissions
                .first()
                .map(|a| a.at + window)
                .unwrap_or(now);
            let retry_after_secs = (reset_at - now).num_seconds().max(1) as u64;
            return Err(AppError::RateLimited {
                limit: self.budget,
                remaining: self.budget.saturating_sub(used),
                reset_at: reset_at.timestamp(),
                retry_after_secs,
            });
        }

        state.admissions.push(Admission { cost, at: now });
        Ok(())
    }

    pub fn remaining(&self, caller: &str) -> u64 {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.window).expect("window fits in chrono::Duration");
        let mut callers = self.callers.lock();
        let state = callers.entry(caller.to_owned()).or_default();
        state.admissions.retain(|a| now - a.at < window);
        let used: u64 = state.admissions.iter().map(|a| a.cost).sum();
        self.budget.saturating_sub(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_budget_then_rate_limits() {
        let limiter = CostRateLimiter::new(Duration::from_secs(60), 100);
        assert!(limiter.admit("caller-a", Operation::GraphQuery).is_ok());
        assert!(limiter.admit("caller-a", Operation::GraphQuery).is_ok());
        let err = limiter.admit("caller-a", Operation::GraphQuery).unwrap_err();
        match err {
            AppError::RateLimited { retry_after_secs, .. } => assert!(retry_after_secs > 0),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn callers_have_independent_budgets() {
        let limiter = CostRateLimiter::new(Duration::from_secs(60), 50);
        assert!(limiter.admit("caller-a", Operation::GraphQuery).is_ok());
        assert!(limiter.admit("caller-b", Operation::GraphQuery).is_ok());
    }

    #[test]
    fn operation_costs_match_the_cost_table() {
        assert_eq!(Operation::GraphQuery.cost(), 50);
        assert_eq!(Operation::Search.cost(), 10);
        assert_eq!(Operation::AccountFetch.cost(), 5);
        assert_eq!(Operation::Save.cost(), 20);
    }
}
