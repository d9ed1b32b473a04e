//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Wrap a transport call with a timeout.
///
/// Elapsed calls become [`TransportError::Timeout`], which callers treat as
/// transient.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(duration.as_millis() as u64)),
    }
}
