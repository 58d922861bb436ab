// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::metrics::backend::MetricsBackend;
use crate::metrics::batch::Batch;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 100;

/// How a failed delivery is retried. Attempt counts include the first try.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    Disabled,
    Immediate(u32),
    /// attempts, delay in ms
    LinearBackoff(u32, u64),
    /// attempts, first delay in ms, doubled after every failure
    ExponentialBackoff(u32, u64),
}

impl RetryStrategy {
    pub fn from_flag(should_retry_on_failure: bool) -> Self {
        if should_retry_on_failure {
            Self::ExponentialBackoff(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_BASE_MS)
        } else {
            Self::Disabled
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Disabled => 1,
            Self::Immediate(attempts)
            | Self::LinearBackoff(attempts, _)
            | Self::ExponentialBackoff(attempts, _) => (*attempts).max(1),
        }
    }

    /// Delay before the next try, after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        match self {
            Self::Disabled | Self::Immediate(_) => Duration::ZERO,
            Self::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            Self::ExponentialBackoff(_, base_ms) => {
                let exponent = attempts.saturating_sub(1).min(16);
                Duration::from_millis(base_ms.saturating_mul(2_u64.pow(exponent)))
            }
        }
    }
}

/// Delivers `batch`, retrying transient failures until the strategy gives
/// up or the next attempt could not finish before `deadline`.
pub async fn deliver_with_retry(
    backend: &dyn MetricsBackend,
    batch: &Batch,
    strategy: RetryStrategy,
    deadline: Instant,
) -> Result<(), DeliveryError> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let result = match timeout_at(deadline, backend.deliver(batch)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::DeadlineExceeded),
        };

        let e = match result {
            Ok(()) => {
                debug!("Delivered {} samples after {attempts} attempt(s)", batch.len());
                return Ok(());
            }
            Err(e) => e,
        };

        if !e.is_retryable() || attempts >= strategy.max_attempts() {
            return Err(e);
        }

        let backoff = strategy.backoff(attempts);
        if Instant::now() + backoff >= deadline {
            warn!("Not retrying delivery, flush deadline reached: {e}");
            return Err(e);
        }

        debug!(
            "Delivery attempt {attempts} failed, retrying in {} ms: {e}",
            backoff.as_millis()
        );
        sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        calls: AtomicU32,
        failures: u32,
        status: StatusCode,
    }

    impl FlakyBackend {
        fn new(failures: u32, status: StatusCode) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                status,
            }
        }
    }

    #[async_trait]
    impl MetricsBackend for FlakyBackend {
        async fn deliver(&self, _batch: &Batch) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(DeliveryError::Status {
                    status: self.status,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl MetricsBackend for SlowBackend {
        async fn deliver(&self, _batch: &Batch) -> Result<(), DeliveryError> {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_backoff_schedule() {
        let strategy = RetryStrategy::from_flag(true);
        assert_eq!(strategy.max_attempts(), 3);
        assert_eq!(strategy.backoff(1), Duration::from_millis(100));
        assert_eq!(strategy.backoff(2), Duration::from_millis(200));
        assert_eq!(strategy.backoff(3), Duration::from_millis(400));

        assert_eq!(RetryStrategy::from_flag(false).max_attempts(), 1);
        assert_eq!(RetryStrategy::Immediate(0).max_attempts(), 1);
        assert_eq!(RetryStrategy::LinearBackoff(2, 50).backoff(2), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_disabled_makes_one_attempt() {
        let backend = FlakyBackend::new(5, StatusCode::INTERNAL_SERVER_ERROR);
        let result =
            deliver_with_retry(&backend, &Batch::new(), RetryStrategy::Disabled, far_deadline())
                .await;

        assert!(result.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let backend = FlakyBackend::new(2, StatusCode::SERVICE_UNAVAILABLE);
        let result = deliver_with_retry(
            &backend,
            &Batch::new(),
            RetryStrategy::LinearBackoff(3, 1),
            far_deadline(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let backend = FlakyBackend::new(10, StatusCode::INTERNAL_SERVER_ERROR);
        let result = deliver_with_retry(
            &backend,
            &Batch::new(),
            RetryStrategy::Immediate(3),
            far_deadline(),
        )
        .await;

        assert!(matches!(result, Err(DeliveryError::Status { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let backend = FlakyBackend::new(10, StatusCode::FORBIDDEN);
        let result = deliver_with_retry(
            &backend,
            &Batch::new(),
            RetryStrategy::Immediate(3),
            far_deadline(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_past_deadline_stops_retrying() {
        let backend = FlakyBackend::new(10, StatusCode::INTERNAL_SERVER_ERROR);
        let deadline = Instant::now() + Duration::from_millis(50);
        let result = deliver_with_retry(
            &backend,
            &Batch::new(),
            RetryStrategy::LinearBackoff(3, 1_000),
            deadline,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_delivery_hits_deadline() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let result =
            deliver_with_retry(&SlowBackend, &Batch::new(), RetryStrategy::Immediate(3), deadline)
                .await;

        assert!(matches!(result, Err(DeliveryError::DeadlineExceeded)));
    }
}
