//! # Retry With Backoff
//!
//! Database work that fails with a transient error (busy database, pool
//! exhaustion, lost connection) is run again after an exponentially growing
//! delay. There is no elapsed-time limit: a retry loop ends on success, on a
//! permanent error, on the optional attempt cap, or on shutdown.
//!
//! ```text
//!  attempt ──► Ok ─────────────────────────────► return value
//!     │
//!     ├──► Err (permanent) ───────────────────► return error
//!     │
//!     └──► Err (transient) ──► cap reached? ──► RetriesExhausted
//!                                  │ no
//!                                  ▼
//!                  sleep(next_backoff) ◄── shutdown ──► Cancelled
//! ```
//!
//! Cancellation drops the in-flight future. A `sqlx::Transaction` owned by
//! that future rolls back on drop.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ManagerError, ManagerResult};

/// Backoff parameters shared by every handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// `None` retries until success or shutdown.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or `shutdown` fires.
///
/// ## Arguments
/// * `policy` - Backoff parameters and optional attempt cap
/// * `shutdown` - Aborts both the running attempt and the backoff sleep
/// * `what` - Short description used in log lines
/// * `op` - Produces a fresh attempt on every call
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    what: &str,
    mut op: F,
) -> ManagerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ManagerResult<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempts: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            return Err(ManagerError::Cancelled);
        }

        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(ManagerError::Cancelled),
            result = op() => result,
        };

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!(what = %what, attempts, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(ManagerError::RetriesExhausted {
                attempts,
                last_error: err.to_string(),
            });
        }

        let Some(delay) = backoff.next_backoff() else {
            return Err(ManagerError::RetriesExhausted {
                attempts,
                last_error: err.to_string(),
            });
        };

        warn!(what = %what, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err, "Transient failure, retrying");

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(ManagerError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use globalhub_db::DbError;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    fn busy() -> ManagerError {
        ManagerError::Database(DbError::Busy("database is locked".into()))
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let shutdown = CancellationToken::new();

        let result = retry_with_backoff(&fast(), &shutdown, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(busy())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let shutdown = CancellationToken::new();

        let result: ManagerResult<()> = retry_with_backoff(&fast(), &shutdown, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ManagerError::Database(DbError::QueryFailed("syntax".into())))
        })
        .await;

        assert!(matches!(result, Err(ManagerError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..fast()
        };
        let shutdown = CancellationToken::new();

        let result: ManagerResult<()> =
            retry_with_backoff(&policy, &shutdown, "test", || async { Err(busy()) }).await;

        match result {
            Err(ManagerError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_unbounded_retry() {
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result: ManagerResult<()> =
            retry_with_backoff(&fast(), &shutdown, "test", || async { Err(busy()) }).await;

        assert!(matches!(result, Err(ManagerError::Cancelled)));
    }
}
