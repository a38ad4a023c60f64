//! Shared utility functions.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::{Error, Result};

/// Await a fallible future, failing with `Error::Timeout` once `duration` elapses.
///
/// The future is dropped on timeout, which kills command agents spawned
/// with `kill_on_drop`.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// Milliseconds in a duration, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
