//! Caller-side retry policy.
//!
//! The transport itself never resends anything. Requests issued by the engine
//! (receiver registers, protocol probes, feature discovery) go through
//! [`with_retry`] with the configured retry count instead.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::HidppError;

/// How long to wait before retrying a request the device reported as busy.
pub const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Runs `op` up to `retry_count + 1` times.
///
/// Timeouts are retried immediately, busy errors after [`BUSY_RETRY_DELAY`].
/// Any other error, or the last error once the retries are exhausted, is
/// returned as is.
pub async fn with_retry<T, F, Fut>(
    retry_count: u32,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, HidppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HidppError>>,
{
    let mut attempt = 0;

    loop {
        let err = match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("HID++ request succeeded on attempt {}", attempt + 1);
                }
                return Ok(value);
            },
            Err(err) => err,
        };

        let retryable = matches!(err, HidppError::Timeout) || err.is_busy();
        if !retryable || attempt >= retry_count {
            return Err(err);
        }

        attempt += 1;
        debug!(
            "HID++ transient error (attempt {}/{}): {}, retrying...",
            attempt,
            retry_count + 1,
            err
        );

        if err.is_busy() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(HidppError::Cancelled),
                _ = tokio::time::sleep(BUSY_RETRY_DELAY) => {},
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::protocol::{fap, rap};

    #[tokio::test]
    async fn timeouts_are_retried_up_to_the_count() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(2, &CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HidppError::Timeout)
        })
        .await;

        assert!(matches!(result, Err(HidppError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_devices_are_retried_after_a_delay() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = with_retry(2, &CancellationToken::new(), || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(HidppError::RegisterAccess(rap::ErrorCode::Busy)),
                1 => Err(HidppError::FeatureAccess(fap::ErrorCode::Busy)),
                _ => Ok(7u8),
            }
        })
        .await;

        assert_eq!(result.ok(), Some(7));
        assert!(started.elapsed() >= BUSY_RETRY_DELAY * 2);
    }

    #[tokio::test]
    async fn other_errors_are_returned_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(5, &CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HidppError::RegisterAccess(rap::ErrorCode::InvalidAddress))
        })
        .await;

        assert!(matches!(
            result,
            Err(HidppError::RegisterAccess(rap::ErrorCode::InvalidAddress))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_wait_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = with_retry(3, &cancel, || async {
            Err(HidppError::RegisterAccess(rap::ErrorCode::Busy))
        })
        .await;

        assert!(matches!(result, Err(HidppError::Cancelled)));
    }
}
