// SPDX-License-Identifier: MIT
//! Exponential backoff retry for calls to the AI upstream.

use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try). Default: 3.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled by `multiplier` after each
    /// failure. Default: 500 ms.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts. Default: 30 s.
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config suitable for unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }
}

/// Run `op` until it succeeds or `max_attempts` is exhausted, sleeping with
/// exponential backoff between attempts. Returns the last error on failure.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= config.max_attempts => {
                warn!(attempt, err = %e, "giving up after final attempt");
                return Err(e);
            }
            Err(e) => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, err = %e, "retrying");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(
                    Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier),
                    config.max_delay,
                );
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry_with_backoff(&RetryConfig::instant(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry_with_backoff(&RetryConfig::instant(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, String> = retry_with_backoff(&RetryConfig::instant(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("fail {n}")) }
        })
        .await;
        assert_eq!(result.unwrap_err(), "fail 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
