//! Retry with exponential backoff and jitter
//!
//! Used for one-shot setup calls (building the Kubernetes client, probing
//! the API server) where there is no scenario poll budget to lean on. Calls
//! made inside a scenario use [`crate::poll`] instead so they share the
//! scenario's timeout and cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff configuration for setup calls that may fail transiently
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until `max_attempts` is reached, stopping early at the first
/// error `should_retry` rejects and returning it unchanged.
pub async fn retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !should_retry(&e) {
            return Err(e);
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        // 0.5x to 1.5x of the nominal delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::time::sleep(jittered_delay).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
