//! # Retry Policy
//!
//! Bounded exponential backoff around one optimistic read-modify-write.
//!
//! ## Attempt Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   attempt 1 ──► read book ──► apply rule ──► versioned put              │
//! │                                                   │                     │
//! │                     ┌───────────── Ok ◄───────────┤                     │
//! │                     ▼                             │ conflict / busy     │
//! │                  return                           ▼                     │
//! │                                          attempts left?                 │
//! │                                          │            │                 │
//! │                                         yes           no                │
//! │                                          │            │                 │
//! │                             sleep(backoff)       ConcurrencyConflict    │
//! │                                          │       or StoreUnavailable    │
//! │                                          ▼                              │
//! │                                  attempt n + 1                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every attempt re-reads the book, so a retry always works on fresh state.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::EngineResult;

/// How often, and how patiently, a conflicting operation is re-run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// Transient store faults that outlast the budget surface as
    /// [`crate::EngineError::StoreUnavailable`]; conflicts surface as
    /// [`crate::EngineError::ConcurrencyConflict`].
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 1u32;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after conflict"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.exhausted()),
            }
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use libris_core::CoreError;
    use libris_db::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_conflict_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast(5)
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::from(DbError::conflict("Book", "b1", 0)))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_budget() {
        let calls = &AtomicU32::new(0);
        let result: EngineResult<()> = fast(3)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::from(DbError::conflict("Book", "b1", 0)))
            })
            .await;

        assert!(matches!(result, Err(EngineError::ConcurrencyConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_busy_store_becomes_unavailable() {
        let result: EngineResult<()> = fast(2)
            .run("test", || async { Err(EngineError::from(DbError::Busy("database is locked".into()))) })
            .await;

        assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_rule_violation_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: EngineResult<()> = fast(5)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::from(CoreError::BookNotFound("b1".into())))
            })
            .await;

        assert!(matches!(result, Err(EngineError::Core(CoreError::BookNotFound(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
