/*!
 * Retryable transaction helpers
 *
 * Every cart, checkout and order-status operation runs as one storage
 * transaction per attempt. A transient conflict (serialization failure,
 * deadlock, lost compare-and-swap, attempt timeout) discards the attempt and
 * re-runs the whole unit of work from scratch; domain errors surface at once.
 */

use metrics::counter;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    IsolationLevel, TransactionTrait,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::errors::ServiceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
    /// Upper bound for a single attempt; exceeding it counts as a conflict
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens a transaction with snapshot semantics where the backend offers them.
///
/// Postgres runs at `REPEATABLE READ`, which is snapshot isolation and reports
/// write-write conflicts as SQLSTATE 40001. SQLite transactions are already
/// serialized by its single writer lock.
pub async fn begin_transaction(db: &DatabaseConnection) -> Result<DatabaseTransaction, DbErr> {
    match db.get_database_backend() {
        DbBackend::Postgres => {
            db.begin_with_config(
                Some(IsolationLevel::RepeatableRead),
                Some(AccessMode::ReadWrite),
            )
            .await
        }
        _ => db.begin().await,
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// `attempt` must open and commit its own transaction so that every retry
/// starts from fresh reads. The last error is returned unchanged.
///
/// # Example
///
/// ```rust,ignore
/// with_transaction_retry(&retry, "cart.add_item", || async {
///     let txn = begin_transaction(&db).await?;
///     // reads and writes against txn
///     txn.commit().await?;
///     Ok(())
/// })
/// .await?;
/// ```
pub async fn with_transaction_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        let outcome = match timeout(config.attempt_timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::TransactionConflict(format!(
                "{} exceeded {:?}",
                operation, config.attempt_timeout
            ))),
        };

        match outcome {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempts < max_attempts => {
                warn!(
                    operation,
                    attempt = attempts,
                    error = %err,
                    "Transient transaction failure, retrying in {:?}",
                    config.backoff
                );
                counter!("checkout_engine.transaction.retried", 1, "operation" => operation);
                sleep(config.backoff).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    error!(operation, attempts, error = %err, "Retries exhausted");
                    counter!("checkout_engine.transaction.exhausted", 1, "operation" => operation);
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_transaction_retry(&fast_config(3), "test.op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ServiceError::TransactionConflict("write conflict".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_transaction_retry(&fast_config(3), "test.op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::InsufficientStock("none left".into()))
        })
        .await;

        assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn surfaces_last_conflict_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_transaction_retry(&fast_config(3), "test.op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::DatabaseError(DbErr::Custom(
                "could not serialize access due to concurrent update".into(),
            )))
        })
        .await;

        assert_matches!(result, Err(ServiceError::DatabaseError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_as_conflicts() {
        let config = RetryConfig {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(20),
        };
        let result: Result<(), _> = with_transaction_retry(&config, "test.slow", || async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_matches!(result, Err(ServiceError::TransactionConflict(_)));
    }
}
