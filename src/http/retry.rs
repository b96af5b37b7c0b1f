//! Bounded retry driver for operations that tag their transient faults.

use anyhow::Result;
use log::{debug, warn};

use crate::error::Retryable;

/// Total number of attempts for a retryable operation.
pub const MAX_ATTEMPTS: usize = 5;

/// Runs `operation`, re-invoking it while it fails with a [`Retryable`].
///
/// Attempts are strictly sequential with no delay. Errors that are not
/// tagged [`Retryable`] propagate unchanged after a single invocation.
/// Once `MAX_ATTEMPTS` is reached the *original* fault the tag wraps is
/// returned, never the wrapper.
pub async fn retrying<F, Fut, T>(operation_name: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => match e.downcast::<Retryable>() {
                Ok(retryable) => {
                    warn!(
                        "{}: attempt {}/{} failed: {}",
                        operation_name, attempt, MAX_ATTEMPTS, retryable
                    );
                    if attempt >= MAX_ATTEMPTS {
                        return Err(retryable.into_original());
                    }
                    attempt += 1;
                }
                Err(other) => {
                    debug!("{}: not retryable: {:#}", operation_name, other);
                    return Err(other);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    #[tokio::test]
    async fn test_retrying_success() {
        let result = retrying("test", || async { Ok::<_, anyhow::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retrying_propagates_non_retryable_after_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retrying("test", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(anyhow::Error::new(Boom))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<Boom>().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retrying_third_time_lucky() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retrying("test", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                let count = calls.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(anyhow::Error::new(Retryable::wrapping("oops", Boom)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retrying_exhausts_and_reraises_the_original() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retrying("test", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(anyhow::Error::new(Retryable::wrapping("oops", Boom)))
            }
        })
        .await;

        let err = result.unwrap_err();
        // The wrapped fault, not the Retryable tag, is what surfaces.
        assert!(err.downcast_ref::<Boom>().is_some());
        assert!(err.downcast_ref::<Retryable>().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retrying_exhausts_a_bare_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retrying("test", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(anyhow::Error::new(Retryable::new("oops")))
            }
        })
        .await;

        let err = result.unwrap_err();
        // The tag is shed on exhaustion, so an enclosing retrying() call
        // treats the failure as terminal rather than starting over.
        assert!(err.downcast_ref::<Retryable>().is_none());
        assert_eq!(err.to_string(), "oops");
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal_for_an_enclosing_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retrying("outer", || {
            let calls = Arc::clone(&calls_clone);
            async move {
                retrying("inner", || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<i32, _>(anyhow::Error::new(Retryable::new("oops")))
                    }
                })
                .await
            }
        })
        .await;

        assert!(result.is_err());
        // Inner budget only; the outer loop never re-drives it.
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
