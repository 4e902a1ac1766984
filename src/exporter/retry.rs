// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-exporter retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use crate::error::ExportError;

/// Backoff settings owned by a single exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Fraction of the delay added as random jitter (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let jitter_amount = if jitter > 0.0 {
            clamped * jitter * rand::thread_rng().gen_range(0.0..1.0)
        } else {
            0.0
        };

        Duration::from_millis((clamped + jitter_amount) as u64)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    exporter: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ExportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExportError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= policy.max_retries || !error.is_retryable() {
                    return Err(error);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    exporter = %exporter,
                    attempt = attempt + 1,
                    error = %error,
                    "Export attempt failed, retrying in {:?}",
                    delay
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_grows_and_clamps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(750));
        }
    }

    #[tokio::test]
    async fn test_retries_transport_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_with_backoff("test", &fast_policy(3), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ExportError::Transport("connection refused".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_with_backoff("test", &fast_policy(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ExportError::Timeout(10))
        })
        .await;

        assert!(matches!(result, Err(ExportError::Timeout(10))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_with_backoff("test", &fast_policy(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ExportError::Status {
                status: 400,
                message: "bad request".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
