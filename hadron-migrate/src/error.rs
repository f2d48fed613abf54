//! Error types for the migration engine.

use hadron_mysql::MysqlError;
use thiserror::Error;

use crate::engine::MigrationPhase;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during an online schema migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database operation error.
    #[error("Database error: {0}")]
    Database(#[from] MysqlError),

    /// A table definition could not be read or rewritten.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A generated or supplied identifier is unusable.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// A rename mapping cannot be executed as one statement.
    #[error("Invalid rename mapping: {0}")]
    InvalidMapping(String),

    /// A backfill chunk failed; the copy can resume after `last_copied_key`.
    #[error("Backfill failed after key {last_copied_key:?}: {source}")]
    Backfill {
        /// Highest primary key known to be copied.
        last_copied_key: Option<i64>,
        /// Underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// Replaying captured changes failed.
    #[error("Replay error: {0}")]
    Replay(String),

    /// The cutover rename failed.
    #[error("Swap error: {0}")]
    Swap(String),

    /// The orchestrator was asked to skip or repeat a phase.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase.
        from: MigrationPhase,
        /// Requested phase.
        to: MigrationPhase,
    },

    /// Invalid migration configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an invalid name error.
    pub fn invalid_name(msg: impl Into<String>) -> Self {
        Self::InvalidName(msg.into())
    }

    /// Create an invalid mapping error.
    pub fn invalid_mapping(msg: impl Into<String>) -> Self {
        Self::InvalidMapping(msg.into())
    }

    /// Create a replay error.
    pub fn replay(msg: impl Into<String>) -> Self {
        Self::Replay(msg.into())
    }

    /// Create a swap error.
    pub fn swap(msg: impl Into<String>) -> Self {
        Self::Swap(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a chunk failure with the resumption point.
    pub fn backfill(last_copied_key: Option<i64>, source: MigrationError) -> Self {
        Self::Backfill {
            last_copied_key,
            source: Box::new(source),
        }
    }

    /// Key to resume a failed backfill from, if this is a backfill failure.
    pub fn resume_key(&self) -> Option<Option<i64>> {
        match self {
            Self::Backfill {
                last_copied_key, ..
            } => Some(*last_copied_key),
            _ => None,
        }
    }

    /// Check if retrying the failed step may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Database(e) => e.is_transient(),
            Self::Backfill { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}
