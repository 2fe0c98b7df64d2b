//! Bounded-wait combinators
//!
//! [`with_timeout`] drops the operation when the bound fires.
//! [`with_timeout_detached`] spawns it, so it keeps running after the bound
//! fires and its side effects may still land.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A bounded wait that did not resolve.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// The bound fired before the operation completed
    #[error("operation timed out after {limit:?}")]
    Elapsed { limit: Duration },

    /// The detached operation panicked or was aborted
    #[error("detached operation did not complete: {0}")]
    Detached(String),
}

/// Resolve with `fut`'s output, or `Elapsed` once `limit` passes.
pub async fn with_timeout<F>(limit: Duration, fut: F) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError::Elapsed { limit })
}

/// Like [`with_timeout`], but the operation runs as its own task and is not
/// cancelled when the bound fires.
pub async fn with_timeout_detached<F>(limit: Duration, fut: F) -> Result<F::Output, TimeoutError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(join_err)) => Err(TimeoutError::Detached(join_err.to_string())),
        Err(_) => Err(TimeoutError::Elapsed { limit }),
    }
}
