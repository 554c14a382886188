// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Exponential backoff for Time-Stamp Authority requests.
//
// Only transient errors (transport failures and the TSA's "waiting" status)
// are retried. Delays double from `base_delay` and are capped at
// `max_delay`, so the gaps between attempts never shrink.

use std::time::Duration;

use notarium_core::config::TimestampConfig;
use notarium_core::error::NotariumError;
use notarium_core::types::ErrorClass;
use tracing::{debug, info, warn};

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&TimestampConfig::default())
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry: the error is permanent.
    GiveUp,
    /// Maximum attempts used up.
    Exhausted,
}

impl BackoffPolicy {
    pub fn from_config(config: &TimestampConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    ///
    /// ```text
    /// attempt 1:  0
    /// attempt n:  min(base * 2^(n-2), max)
    /// ```
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(32);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what to do after attempt number `attempt` failed with `err`.
    pub fn should_retry(&self, err: &NotariumError, attempt: u32) -> RetryDecision {
        match err.class() {
            ErrorClass::Permanent => {
                info!(reason = err.reason_code(), "permanent error, not retrying");
                RetryDecision::GiveUp
            }
            ErrorClass::Transient if attempt >= self.max_attempts => {
                warn!(attempt, max = self.max_attempts, "attempt limit exhausted");
                RetryDecision::Exhausted
            }
            ErrorClass::Transient => {
                let delay = self.delay_before(attempt + 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}
