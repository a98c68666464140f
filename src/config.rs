//! Queue configuration
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Quiet period before a debounced flush, in milliseconds
    #[serde(default = "default_quiet_period")]
    pub quiet_period_ms: u64,

    /// Warn when pending entries exceed this many
    #[serde(default = "default_pending_warn_depth")]
    pub pending_warn_depth: usize,
}

impl QueueConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period(),
            pending_warn_depth: default_pending_warn_depth(),
        }
    }
}

/// Failure policy for backend writes inside one flush.
///
/// `max_attempts = 1` means at most one attempt per debounce cycle; failed
/// entries are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::default()
    }

    /// Up to `max_attempts` attempts with exponential backoff
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the persistence API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Path that accepts unload beacons
    #[serde(default = "default_beacon_path")]
    pub beacon_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
            beacon_path: default_beacon_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time given to detached beacon requests before the process exits
    #[serde(default = "default_unload_grace")]
    pub unload_grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            unload_grace_ms: default_unload_grace(),
        }
    }
}

// Defaults
fn default_quiet_period() -> u64 { 1000 }
fn default_pending_warn_depth() -> usize { 1000 }
fn default_max_attempts() -> u32 { 1 }
fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 5000 }
fn default_base_url() -> String { "http://localhost:3000".to_string() }
fn default_request_timeout() -> u64 { 10_000 }
fn default_beacon_path() -> String { "/api/sync/beacon".to_string() }
fn default_unload_grace() -> u64 { 500 }

impl SyncConfig {
    /// Config for interactive sessions (the default 1s quiet period)
    pub fn for_interactive() -> Self {
        Self::default()
    }

    /// Config with a short quiet period for tests and local tooling
    pub fn for_testing() -> Self {
        Self {
            queue: QueueConfig {
                quiet_period_ms: 50,
                ..QueueConfig::default()
            },
            shutdown: ShutdownConfig { unload_grace_ms: 0 },
            ..Self::default()
        }
    }

    /// Load from a TOML file, falling back to defaults when it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
