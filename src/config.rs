//! Cache configuration.
//!
//! Feature switches for the tiers plus the tuning knobs of every component.
//! Loaded from YAML; every field has a default so an empty document is valid.
//!
//! ```yaml
//! use_local_storage: true
//! use_remote_store: true
//! auto_sync: true
//! migration_enabled: true
//! local_dir: /var/lib/otakon/cache
//! remote_url: https://project.example.co/rest/v1
//! sync_interval_secs: 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{
    LocalTierConfig, MemoryTierConfig, RetryPolicy, DEFAULT_KEY_PREFIX, DEFAULT_LOCAL_QUOTA,
    DEFAULT_MEMORY_BUDGET,
};
use crate::error::{Error, Result};

/// Top-level cache options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Persist entries on the device.
    #[serde(default = "default_true")]
    pub use_local_storage: bool,
    /// Let an authenticated session use the remote tier.
    #[serde(default = "default_true")]
    pub use_remote_store: bool,
    /// Run periodic reconciliation while authenticated.
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    /// Upload device-only entries on first login.
    #[serde(default = "default_true")]
    pub migration_enabled: bool,

    /// Memory tier byte budget.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,
    /// Local tier byte quota.
    #[serde(default = "default_local_quota")]
    pub local_quota_bytes: u64,
    /// Directory backing the local tier (absent = volatile).
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
    /// Namespace prefix for persisted local entries.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Base URL of the remote REST endpoint.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Public API key sent alongside the session token.
    #[serde(default)]
    pub remote_api_key: Option<String>,

    /// Seconds between periodic reconciliations.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Entries uploaded per migration chunk.
    #[serde(default = "default_batch_size")]
    pub migration_batch_size: usize,
    /// Attempts per tier operation, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
    /// Recent keys remembered per content type for similarity lookup.
    #[serde(default = "default_similarity_window")]
    pub similarity_window: usize,
}

fn default_true() -> bool {
    true
}

fn default_memory_budget() -> u64 {
    DEFAULT_MEMORY_BUDGET
}

fn default_local_quota() -> u64 {
    DEFAULT_LOCAL_QUOTA
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_sync_interval() -> u64 {
    300
}

fn default_batch_size() -> usize {
    50
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    100
}

fn default_similarity_window() -> usize {
    256
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            use_local_storage: true,
            use_remote_store: true,
            auto_sync: true,
            migration_enabled: true,
            memory_budget_bytes: default_memory_budget(),
            local_quota_bytes: default_local_quota(),
            local_dir: None,
            key_prefix: default_key_prefix(),
            remote_url: None,
            remote_api_key: None,
            sync_interval_secs: default_sync_interval(),
            migration_batch_size: default_batch_size(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_delay(),
            similarity_window: default_similarity_window(),
        }
    }
}

impl CacheOptions {
    /// Load and validate options from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate options from a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map
        let options: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?
        };
        options.validate()?;
        Ok(options)
    }

    /// Check numeric knobs.
    pub fn validate(&self) -> Result<()> {
        if self.memory_budget_bytes == 0 {
            return Err(Error::Config("memory_budget_bytes must be positive".into()));
        }
        if self.local_quota_bytes == 0 {
            return Err(Error::Config("local_quota_bytes must be positive".into()));
        }
        if self.migration_batch_size == 0 {
            return Err(Error::Config("migration_batch_size must be positive".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::Config("retry_max_attempts must be positive".into()));
        }
        Ok(())
    }

    /// Remote URL, required when the remote tier is built from these options.
    pub fn require_remote_url(&self) -> Result<&str> {
        if !self.use_remote_store {
            return Err(Error::Config("use_remote_store is disabled".into()));
        }
        self.remote_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Config("use_remote_store requires remote_url".into()))
    }

    /// Backoff policy for tier operations.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    /// Period of background reconciliation.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Memory tier settings.
    pub fn memory_config(&self) -> MemoryTierConfig {
        MemoryTierConfig {
            budget_bytes: self.memory_budget_bytes,
        }
    }

    /// Local tier settings.
    pub fn local_config(&self) -> LocalTierConfig {
        LocalTierConfig {
            quota_bytes: self.local_quota_bytes,
            dir: self.local_dir.clone(),
            key_prefix: self.key_prefix.clone(),
        }
    }
}
