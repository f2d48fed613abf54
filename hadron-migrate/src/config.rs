//! Migration tuning knobs, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Default number of primary-key values covered by one backfill chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// Configuration for a single online migration.
///
/// ```toml
/// primary_key = "id"
/// chunk_size = 5000
/// chunk_delay_ms = 10
/// max_backfill_retries = 3
/// keep_retired_table = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Integer primary key column of the source table.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Primary-key span copied per backfill statement.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Pause between backfill chunks, in milliseconds.
    #[serde(default)]
    pub chunk_delay_ms: u64,

    /// How many times a failed backfill resumes before the migration fails.
    #[serde(default = "default_max_backfill_retries")]
    pub max_backfill_retries: u32,

    /// Pause before resuming a failed backfill, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Keep the pre-migration table under its retired name after cutover.
    #[serde(default)]
    pub keep_retired_table: bool,

    /// Hold `LOCK TABLES` around the final replay pass and rename.
    #[serde(default = "default_true")]
    pub lock_cutover: bool,
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_backfill_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            primary_key: default_primary_key(),
            chunk_size: default_chunk_size(),
            chunk_delay_ms: 0,
            max_backfill_retries: default_max_backfill_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            keep_retired_table: false,
            lock_cutover: true,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MigrationError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.chunk_size == 0 {
            return Err(MigrationError::config("chunk_size must be greater than zero"));
        }
        if self.primary_key.trim().is_empty() {
            return Err(MigrationError::config("primary_key must not be empty"));
        }
        Ok(())
    }

    /// Set the primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Set the backfill chunk size.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the pause between backfill chunks.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the number of backfill resumptions.
    pub fn max_backfill_retries(mut self, retries: u32) -> Self {
        self.max_backfill_retries = retries;
        self
    }

    /// Set the pause before resuming a failed backfill.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Keep the retired table after cutover.
    pub fn keep_retired_table(mut self, keep: bool) -> Self {
        self.keep_retired_table = keep;
        self
    }

    /// Enable or disable the cutover table lock.
    pub fn lock_cutover(mut self, lock: bool) -> Self {
        self.lock_cutover = lock;
        self
    }

    /// Pause between backfill chunks.
    pub fn chunk_delay_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    /// Pause before resuming a failed backfill.
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
