//! Cancellation and deadline helpers for suspension points (§5).
//!
//! The teacher's transport crates thread a bespoke `CallContext`
//! (`Deadline` + `Cancellation`) through every socket operation and poll
//! cancellation on a timer. This workspace is plain `tokio`, so the same
//! contract — "every external call has an explicit deadline; cancellation
//! is observed at suspension points" — is expressed with
//! `tokio_util::sync::CancellationToken` and `tokio::time::timeout`, which
//! give the same guarantee without a hand-rolled polling loop.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::IngestError;

/// Races `future` against `deadline` and `token`. Returns
/// `Ok(T)` on success, `Err(IngestError::Unavailable)` if cancelled, or
/// `Err(IngestError::Unavailable)` on deadline expiry — both are
/// surfaced identically to callers per §5 ("callers treat it as non-fatal
/// and exit their loops").
pub async fn run_cancellable<F, T>(
    operation: &str,
    token: &CancellationToken,
    deadline: Duration,
    future: F,
) -> Result<T, IngestError>
where
    F: Future<Output = Result<T, IngestError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(IngestError::unavailable(operation, "cancelled by shutdown signal")),
        result = tokio::time::timeout(deadline, future) => match result {
            Ok(inner) => inner,
            Err(_) => Err(IngestError::unavailable(operation, format!("deadline of {deadline:?} exceeded"))),
        },
    }
}

/// Convenience wrapper for the "tight single-digit ms deadline, fail open
/// to UNAVAILABLE" pattern used by auth lookups and rate-limit verdicts
/// (§5).
pub async fn run_fast<F, T>(
    operation: &str,
    token: &CancellationToken,
    future: F,
) -> Result<T, IngestError>
where
    F: Future<Output = Result<T, IngestError>>,
{
    run_cancellable(operation, token, Duration::from_millis(25), future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_wins_over_pending_future() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_cancellable("test", &token, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, IngestError>(())
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deadline_elapses_before_slow_future() {
        let token = CancellationToken::new();
        let result = run_cancellable("test", &token, Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, IngestError>(())
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fast_future_succeeds() {
        let token = CancellationToken::new();
        let result = run_cancellable("test", &token, Duration::from_secs(1), async {
            Ok::<_, IngestError>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }
}
