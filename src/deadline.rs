//! Shared time-budget primitive for protocol operations.
//!
//! Every public operation in this crate takes one millisecond budget and may
//! internally perform many protocol steps (TCP connect, handshake, several
//! authentication attempts; or repeated channel reads). A [`Deadline`] is
//! created once at the operation's entry point and threaded through every
//! nested step, so the whole operation shares a single budget instead of
//! each step getting a fresh one.
//!
//! Convention (used across the entire crate): a **negative** budget means
//! wait indefinitely; zero or positive is a hard millisecond budget.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A time budget shared by the nested steps of one logical operation.
#[derive(Debug, Clone)]
pub struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// Create a budget from the crate-wide millisecond convention:
    /// negative means indefinite, zero or positive is a hard budget.
    pub fn new(timeout_ms: i64) -> Self {
        let budget = if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Remaining budget; `None` means indefinite.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.start.elapsed()))
    }

    /// Whether a finite budget has run out.
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Milliseconds elapsed since the operation started.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Drive one protocol step to completion within the remaining budget.
    ///
    /// Returns the step's output, or the crate's distinct timeout error
    /// naming `op` when the budget runs out first. With an indefinite
    /// budget the future is awaited directly.
    pub async fn bound<T>(&self, op: &str, fut: impl Future<Output = T>) -> Result<T> {
        match self.remaining() {
            None => Ok(fut.await),
            Some(d) if d.is_zero() => Err(Error::timeout(op, self.elapsed_ms())),
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| Error::timeout(op, self.elapsed_ms())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod budget_arithmetic {
        use super::*;

        #[test]
        fn test_negative_budget_is_indefinite() {
            let deadline = Deadline::new(-1);
            assert_eq!(deadline.remaining(), None);
            assert!(!deadline.expired());
        }

        #[test]
        fn test_zero_budget_is_immediately_expired() {
            let deadline = Deadline::new(0);
            assert!(deadline.expired());
        }

        #[test]
        fn test_positive_budget_starts_unexpired() {
            let deadline = Deadline::new(60_000);
            assert!(!deadline.expired());
            let remaining = deadline.remaining().expect("finite budget");
            assert!(remaining <= Duration::from_millis(60_000));
            assert!(remaining > Duration::from_millis(59_000));
        }

        #[test]
        fn test_remaining_shrinks_over_time() {
            let deadline = Deadline::new(60_000);
            let first = deadline.remaining().expect("finite budget");
            std::thread::sleep(Duration::from_millis(5));
            let second = deadline.remaining().expect("finite budget");
            assert!(second < first);
        }
    }

    mod bound {
        use super::*;

        #[tokio::test]
        async fn test_completes_within_budget() {
            let deadline = Deadline::new(5_000);
            let value = deadline.bound("step", async { 7 }).await.expect("in budget");
            assert_eq!(value, 7);
        }

        #[tokio::test]
        async fn test_times_out_when_budget_exhausted() {
            let deadline = Deadline::new(20);
            let result = deadline
                .bound("slow step", tokio::time::sleep(Duration::from_secs(5)))
                .await;
            match result {
                Err(Error::Timeout { op, .. }) => assert_eq!(op, "slow step"),
                other => panic!("expected timeout, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_zero_budget_fails_without_polling() {
            let deadline = Deadline::new(0);
            let result = deadline.bound("step", async { 1 }).await;
            assert!(matches!(result, Err(Error::Timeout { .. })));
        }

        #[tokio::test]
        async fn test_indefinite_budget_awaits_directly() {
            let deadline = Deadline::new(-5);
            let value = deadline
                .bound("step", async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    42
                })
                .await
                .expect("indefinite budget never times out");
            assert_eq!(value, 42);
        }

        #[tokio::test]
        async fn test_nested_steps_share_one_budget() {
            let deadline = Deadline::new(80);
            // First step consumes most of the budget.
            deadline
                .bound("first", tokio::time::sleep(Duration::from_millis(60)))
                .await
                .expect("first step fits");
            // Second step no longer has 80ms available.
            let result = deadline
                .bound("second", tokio::time::sleep(Duration::from_millis(60)))
                .await;
            assert!(matches!(result, Err(Error::Timeout { .. })));
        }
    }
}
