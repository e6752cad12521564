//! Timeout utilities for build operations

use kiln_errors::{BuildError, Error};
use std::future::Future;
use std::time::Duration;

/// Execute a future with a timeout
///
/// When the deadline passes the future is dropped, which kills any child
/// process spawned with `kill_on_drop`.
pub async fn with_timeout<T, F, E>(future: F, timeout_seconds: u64, on_timeout: E) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
    E: FnOnce(u64) -> BuildError,
{
    tokio::time::timeout(Duration::from_secs(timeout_seconds), future)
        .await
        .map_err(|_| -> Error { on_timeout(timeout_seconds).into() })?
}

/// Execute a future with an optional timeout
pub async fn with_optional_timeout<T, F, E>(
    future: F,
    timeout_seconds: Option<u64>,
    on_timeout: E,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
    E: FnOnce(u64) -> BuildError,
{
    match timeout_seconds {
        Some(timeout) if timeout > 0 => with_timeout(future, timeout, on_timeout).await,
        _ => future.await,
    }
}
