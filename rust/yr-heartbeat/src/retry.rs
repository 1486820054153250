//! Exponential backoff for the registration protocol (spec §4.2: "On
//! non-success code the child retries with exponential backoff bounded by a
//! configurable max interval").

use tokio::time::{sleep, Duration};

use yr_base::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct RegisterRetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RegisterRetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 200,
            max_delay_ms: 10_000,
            max_attempts: 10,
        }
    }
}

/// Runs `attempt` up to `max_attempts` times, doubling the delay from
/// `min_delay_ms` up to `max_delay_ms` between tries. Returns the first
/// `Ok`, or the last error once attempts are exhausted.
pub async fn retry_register<F, Fut, T>(
    config: RegisterRetryConfig,
    mut attempt: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let mut delay_ms = config.min_delay_ms;
    let mut last_error = CoreError::RegisterError("no attempts made".to_string());

    for try_index in 0..config.max_attempts.max(1) {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = err;
                if try_index + 1 >= config.max_attempts {
                    break;
                }
                tracing::warn!(attempt = try_index + 1, error = %last_error, "registration attempt failed, backing off");
                sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(config.max_delay_ms);
            }
        }
    }

    Err(CoreError::RegisterError(format!(
        "registration failed after {} attempts: {}",
        config.max_attempts, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try_without_sleeping() {
        let calls = AtomicU32::new(0);
        let result = retry_register(RegisterRetryConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok::<_, CoreError>(42))
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = AtomicU32::new(0);
        let config = RegisterRetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts: 5,
        };
        let result = retry_register(config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::RegisterError("not yet".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = RegisterRetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts: 3,
        };
        let result = retry_register(config, || {
            std::future::ready(Err::<i32, _>(CoreError::RegisterError("down".to_string())))
        })
        .await;
        assert!(result.is_err());
    }
}
