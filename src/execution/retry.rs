// Retry policy for transient engine failures

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Patterns that indicate a retryable error
/// Note: All patterns must be lowercase since we lowercase the error before matching
pub const RETRYABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "timeout",
    "network",
    "connection",
    "econnreset",
    "etimedout",
    "enotfound",
    "overloaded",
];

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total number of attempts, 1-indexed (default: 3)
    pub max_retries: u32,
    /// Delay between attempts in seconds (default: 5)
    pub retry_delay_secs: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

/// Check if an error message indicates a retryable condition (rate limit,
/// timeout, network error)
pub fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Execute an async operation with retry logic.
///
/// Any failed attempt short of `max_retries` is retried after a fixed
/// delay; classifying which engine failures are worth turning into errors
/// in the first place is the caller's job (see [`is_retryable_error`]).
/// The last error is returned once attempts are exhausted.
pub async fn with_retry<T, F, Fut, R>(
    mut operation: F,
    options: &RetryOptions,
    mut on_retry: Option<R>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &str),
{
    let mut last_error = None;

    for attempt in 1..=options.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt < options.max_retries {
                    let message = error.to_string();
                    log::warn!(
                        "[Retry] Attempt {}/{} failed: {}",
                        attempt,
                        options.max_retries,
                        message
                    );
                    if let Some(callback) = on_retry.as_mut() {
                        callback(attempt, &message);
                    }

                    log::debug!(
                        "[Retry] Waiting {}s before retry...",
                        options.retry_delay_secs
                    );
                    tokio::time::sleep(Duration::from_secs(options.retry_delay_secs)).await;
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("all retry attempts failed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_options(max_retries: u32) -> RetryOptions {
        RetryOptions {
            max_retries,
            retry_delay_secs: 0,
        }
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("rate limit exceeded"));
        assert!(is_retryable_error("Error: 429 Too Many Requests"));
        assert!(is_retryable_error("connection timeout"));
        assert!(is_retryable_error("ECONNRESET"));
        assert!(is_retryable_error("ETIMEDOUT while reading"));
        assert!(is_retryable_error("getaddrinfo ENOTFOUND api.example.com"));
        assert!(is_retryable_error("the model is overloaded"));

        assert!(!is_retryable_error("SyntaxError: unexpected token"));
        assert!(!is_retryable_error("invalid api key"));
        assert!(!is_retryable_error("file not found"));
    }

    #[test]
    fn test_default_options() {
        let options = RetryOptions::default();
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_delay_secs, 5);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(42)
                }
            },
            &fast_options(3),
            None::<fn(u32, &str)>,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_all_attempts_regardless_of_classification() {
        // Classification only governs whether the caller converts a failed
        // result into an error; once here, every error is retried.
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(anyhow!("SyntaxError: unexpected token"))
                }
            },
            &fast_options(3),
            None::<fn(u32, &str)>,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("rate limit exceeded"))
                    } else {
                        Ok("done")
                    }
                }
            },
            &fast_options(3),
            None::<fn(u32, &str)>,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_on_retry_callback_receives_attempt_and_message() {
        let seen: Arc<std::sync::Mutex<Vec<(u32, String)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _ = with_retry(
            || async { Err::<(), _>(anyhow!("timeout")) },
            &fast_options(3),
            Some(move |attempt: u32, message: &str| {
                sink.lock().unwrap().push((attempt, message.to_string()));
            }),
        )
        .await;

        let seen = seen.lock().unwrap();
        // No callback for the final attempt; there is no retry after it.
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[1].0, 2);
        assert!(seen[0].1.contains("timeout"));
    }
}
