//! Retry wrapper for outbound calls to the chat service.
//!
//! Transient (connection-class, 5xx-class) failures are retried with
//! exponential backoff, capped at 3 attempts. Non-transient errors and
//! cancellation surface immediately.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use armorclaw_types::BridgeError;

/// Maximum attempts, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default deadline for a single outbound chat call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Run `op`, retrying transient failures with exponential backoff.
pub async fn retry_transient<T, F, Fut>(
    mut op: F,
    cancel: &CancellationToken,
) -> Result<T, BridgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    let mut backoff = BASE_BACKOFF;
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                debug!(attempt, error = %e, "transient failure, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply the outbound call deadline to a future.
pub async fn with_call_timeout<T, Fut>(future: Fut) -> Result<T, BridgeError>
where
    Fut: Future<Output = Result<T, BridgeError>>,
{
    tokio::time::timeout(CALL_TIMEOUT, future)
        .await
        .map_err(|_| BridgeError::NetworkTransient("call timed out".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn transient_errors_retry_up_to_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let calls_in = calls.clone();
        let result: Result<u32, _> = retry_transient(
            move || {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(BridgeError::NetworkTransient("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            &cancel,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failure_surfaces_after_final_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let calls_in = calls.clone();
        let result: Result<(), _> = retry_transient(
            move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BridgeError::NetworkTransient("still down".into()))
                }
            },
            &cancel,
        )
        .await;
        assert!(matches!(result.unwrap_err(), BridgeError::NetworkTransient(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_do_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let calls_in = calls.clone();
        let result: Result<(), _> = retry_transient(
            move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BridgeError::KeyNotFound("k".into()))
                }
            },
            &cancel,
        )
        .await;
        assert!(matches!(result.unwrap_err(), BridgeError::KeyNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            retry_transient(|| async { Ok(()) }, &cancel).await;
        assert!(matches!(result.unwrap_err(), BridgeError::Cancelled));
    }
}
