use std::future::Future;
use std::time::Duration;

use delaydesk_core::{DelayPolicy, DelayResult};
use tracing::warn;

/// Run `attempt_fn` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is used up. Backoff grows linearly per attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &DelayPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> DelayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DelayResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match attempt_fn().await {
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(operation, attempt, error = %err, "Storage contention, retrying");
                tokio::time::sleep(Duration::from_millis(policy.retry_backoff_ms * attempt as u64)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delaydesk_core::DelayError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> DelayPolicy {
        DelayPolicy {
            max_attempts,
            retry_backoff_ms: 0,
            ..DelayPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_contention_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = with_retry(&policy(3), "assign", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DelayError::Contention("lock timeout".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: DelayResult<()> = with_retry(&policy(2), "assign", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DelayError::Contention("deadlock detected".into()))
        })
        .await;

        assert!(matches!(result, Err(DelayError::Contention(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: DelayResult<()> = with_retry(&policy(5), "delay", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DelayError::DeliveryTimeNotReached)
        })
        .await;

        assert!(matches!(result, Err(DelayError::DeliveryTimeNotReached)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
