// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{NotariumError, Result};

/// Time-Stamp Authority client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// TSA endpoint (http:// or https://).
    pub tsa_url: String,
    /// Per-attempt HTTP timeout.
    pub attempt_timeout_ms: u64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay.
    pub max_delay_ms: u64,
    /// Send a random nonce with every request.
    pub use_nonce: bool,
    /// Ask the TSA to embed its signing certificate in the token.
    pub cert_req: bool,
    /// Accept PKI status "granted with modifications".
    pub accept_granted_with_mods: bool,
    /// Optional TSA policy OID to request (dotted form).
    pub policy_oid: Option<String>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            tsa_url: "http://timestamp.digicert.com".into(),
            attempt_timeout_ms: 10_000,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            use_nonce: true,
            cert_req: true,
            accept_granted_with_mods: false,
            policy_oid: None,
        }
    }
}

impl TimestampConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Idempotency store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a recorded response is replayed before it may be swept.
    pub ttl_secs: u64,
    /// How often the background sweeper runs.
    pub sweep_interval_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Top-level settings for the Notarium service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotariumConfig {
    pub timestamp: TimestampConfig,
    pub idempotency: IdempotencyConfig,
    /// SQLite audit trail location; in-memory when absent.
    pub audit_db_path: Option<PathBuf>,
}

impl NotariumConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!("configuration loaded");
        Ok(config)
    }

    /// Reject settings that would make the service unsafe or useless.
    pub fn validate(&self) -> Result<()> {
        let url = self.timestamp.tsa_url.trim();
        if url.is_empty() {
            return Err(NotariumError::Config("timestamp.tsa_url is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NotariumError::Config(format!(
                "timestamp.tsa_url must be http(s), got '{url}'"
            )));
        }
        if self.timestamp.max_attempts == 0 {
            return Err(NotariumError::Config(
                "timestamp.max_attempts must be at least 1".into(),
            ));
        }
        if self.timestamp.attempt_timeout_ms == 0 {
            return Err(NotariumError::Config(
                "timestamp.attempt_timeout_ms must be positive".into(),
            ));
        }
        if self.idempotency.ttl_secs == 0 {
            return Err(NotariumError::Config(
                "idempotency.ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
