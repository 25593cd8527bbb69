//! Retry wrapper for store writes.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreError;

/// Run `operation` up to `attempts` times with linear backoff.
///
/// Every failed try is logged; the last error is returned to the caller so it
/// can be reported rather than dropped.
pub async fn with_retries<T, F, Fut>(
    label: &str,
    attempts: u32,
    backoff: Duration,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut try_number = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if try_number < attempts => {
                warn!(
                    operation = label,
                    attempt = try_number,
                    max_attempts = attempts,
                    error = %e,
                    "Store write failed, retrying"
                );
                tokio::time::sleep(backoff * try_number).await;
                try_number += 1;
            }
            Err(e) => {
                warn!(
                    operation = label,
                    attempts = attempts,
                    error = %e,
                    "Store write failed after all retries"
                );
                return Err(e);
            }
        }
    }
}
