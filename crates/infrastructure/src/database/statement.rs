use std::future::Future;
use std::time::Duration;

use reyestr_errors::{DispatchError, DispatchResult};
use tracing::warn;

/// Run a store operation under the request deadline. Elapsing the deadline
/// cancels the future (rolling back any open transaction) and surfaces
/// `Timeout`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, fut: F) -> DispatchResult<T>
where
    F: Future<Output = DispatchResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation,
                deadline_seconds = deadline.as_secs(),
                "store operation exceeded deadline"
            );
            Err(DispatchError::Timeout(format!(
                "{operation} exceeded {}s deadline",
                deadline.as_secs()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_operations() {
        let result = with_deadline(Duration::from_secs(1), "fast", async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn times_out_slow_operations() {
        let result: DispatchResult<()> =
            with_deadline(Duration::from_millis(10), "slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DispatchError::Timeout(_))));
    }

    #[tokio::test]
    async fn propagates_inner_errors() {
        let result: DispatchResult<()> = with_deadline(Duration::from_secs(1), "failing", async {
            Err(DispatchError::internal("boom"))
        })
        .await;
        assert!(matches!(result, Err(DispatchError::Internal(_))));
    }
}
