//! Engine configuration
//!
//! Every section has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! default_actor = "taxonomy-bot"
//!
//! [rollback]
//! ttr_budget_ms = 900000
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 50
//!
//! [retention]
//! rollback_targets = 10
//!
//! [storage]
//! backend = "json_file"
//! path = "/var/lib/taxonomy"
//! ```

use crate::error::ConfigError;
use crate::types::Actor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rollback deadline
    pub rollback: RollbackConfig,
    /// Backoff for storage writes
    pub retry: RetryPolicy,
    /// How many past versions stay protected from prune
    pub retention: RetentionConfig,
    /// Where snapshots live
    pub storage: StorageConfig,
    /// Actor recorded when a request does not name one
    pub default_actor: Actor,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollback: RollbackConfig::default(),
            retry: RetryPolicy::default(),
            retention: RetentionConfig::default(),
            storage: StorageConfig::Memory,
            default_actor: Actor::system(),
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback.ttr_budget_ms == 0 {
            return Err(ConfigError::Invalid(
                "rollback.ttr_budget_ms must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.retry.multiplier >= 1.0 && self.retry.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be a finite number >= 1, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            ));
        }
        if self.default_actor.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("default_actor is empty".to_string()));
        }
        if let StorageConfig::JsonFile { path } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("storage.path is empty".to_string()));
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn with_ttr_budget(mut self, budget: Duration) -> Self {
        self.rollback.ttr_budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rollback_targets(mut self, count: usize) -> Self {
        self.retention.rollback_targets = count;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_actor(mut self, actor: Actor) -> Self {
        self.default_actor = actor;
        self
    }

    /// Rollback deadline as a `Duration`.
    #[inline]
    #[must_use]
    pub fn ttr_budget(&self) -> Duration {
        Duration::from_millis(self.rollback.ttr_budget_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Time-to-recovery budget. Fifteen minutes unless configured.
    pub ttr_budget_ms: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            ttr_budget_ms: 15 * 60 * 1000,
        }
    }
}

/// Bounded exponential backoff for storage I/O
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    /// Wait before the second try.
    pub initial_backoff_ms: u64,
    /// Growth factor between waits.
    pub multiplier: f64,
    /// Upper bound on any single wait.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            multiplier: 2.0,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping. Handy in tests.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based: the wait after the first failure is `attempt = 1`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Newest versions kept as rollback targets; prune refuses them.
    pub rollback_targets: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            rollback_targets: 10,
        }
    }
}

/// Snapshot backend selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Nothing survives the process
    #[default]
    Memory,
    /// `versions/<v>.json` and `active.json` under `path`
    JsonFile { path: PathBuf },
}
