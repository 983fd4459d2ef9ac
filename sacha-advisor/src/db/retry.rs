//! Retry for transient SQLite lock errors
//!
//! Lifecycle writes from the request task, the disconnect monitor and background side
//! records can contend for the same database file.

use sacha_common::{Error, Result};
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 500;

/// Retry `operation` with exponential backoff while it fails with "database is locked"
///
/// Other errors are returned immediately. Once `max_wait_ms` has elapsed the last lock
/// error is turned into [`Error::Internal`].
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_lock_error(&err) {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let message = db_err.to_string();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}
