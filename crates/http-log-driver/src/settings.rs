// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Driver-wide settings shared by every pipeline.

use std::env;
use std::time::Duration;

const DEFAULT_RETRY_ATTEMPTS: u64 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a failed batch is retried before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Retry right away, up to the given number of attempts.
    Immediate(u64),
    /// Attempts, then a fixed delay in milliseconds between them.
    LinearBackoff(u64, u64),
    /// Attempts, then a base delay in milliseconds doubled after each failure.
    ExponentialBackoff(u64, u64),
}

impl RetryStrategy {
    /// Total number of attempts, the first one included.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        let attempts = match self {
            RetryStrategy::Immediate(attempts)
            | RetryStrategy::LinearBackoff(attempts, _)
            | RetryStrategy::ExponentialBackoff(attempts, _) => *attempts,
        };
        attempts.max(1)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            RetryStrategy::ExponentialBackoff(_, base_ms) => {
                let exponent = attempt.saturating_sub(1).min(16) as u32;
                Duration::from_millis(base_ms.saturating_mul(1_u64 << exponent))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS)
    }
}

/// Settings the driver applies to all pipelines it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub retry_strategy: RetryStrategy,
    /// Timeout of a single request to the collector.
    pub request_timeout: Duration,
    /// How long `stop` waits for a pipeline to drain before aborting it.
    pub teardown_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            retry_strategy: RetryStrategy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

impl DriverSettings {
    /// Reads settings from the environment, keeping defaults for unset or invalid values.
    #[must_use]
    pub fn from_env() -> Self {
        let attempts = env_u64("HTTP_LOG_DRIVER_RETRY_ATTEMPTS")
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        let backoff_ms =
            env_u64("HTTP_LOG_DRIVER_RETRY_BACKOFF_MS").unwrap_or(DEFAULT_RETRY_BACKOFF_MS);
        let request_timeout = env_u64("HTTP_LOG_DRIVER_REQUEST_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);
        let teardown_timeout = env_u64("HTTP_LOG_DRIVER_TEARDOWN_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TEARDOWN_TIMEOUT, Duration::from_secs);

        Self {
            retry_strategy: RetryStrategy::ExponentialBackoff(attempts, backoff_ms),
            request_timeout,
            teardown_timeout,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|val| val.trim().parse::<u64>().ok())
}
