//! Async timeout wrappers.
//!
//! Every network operation in the driver runs under one of these so a stalled
//! peer surfaces as `TransportError{Timeout}` instead of hanging the caller.

use std::future::Future;
use std::time::Duration;

use crate::error::{constants, DriverError, Result, TransportErrorKind};

/// Default bound for socket reads and writes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for TCP connect plus TLS handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for waiting on a pooled connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `fut` under `duration`, mapping expiry to a transport timeout
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout_message(fut, duration, constants::ERR_TIMEOUT).await
}

/// Same as [`with_timeout_error`] with a caller-chosen message
pub async fn with_timeout_message<F, T>(fut: F, duration: Duration, message: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::transport(
            TransportErrorKind::Timeout,
            format!("{message} after {}ms", duration.as_millis()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expired_future_is_transport_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        let err = result.err();
        assert_eq!(
            err.and_then(|e| e.transport_kind()),
            Some(TransportErrorKind::Timeout)
        );
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout_error(
            async { Err(DriverError::InvalidArgument("bad".into())) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(DriverError::InvalidArgument(_))));
    }
}
