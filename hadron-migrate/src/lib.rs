//! # hadron-migrate
//!
//! Online schema migrations for MySQL.
//!
//! Altering a large table in place locks it for the duration of the copy.
//! This crate instead builds a *ghost* copy with the new schema, keeps it in
//! sync while existing rows are copied, and swaps it in with one atomic
//! rename:
//!
//! ```text
//!                 triggers
//! ┌──────────┐ ───────────────▶ ┌───────────────┐
//! │  source  │                  │ changes table │
//! └──────────┘                  └───────────────┘
//!      │ backfill (chunked)             │ replay
//!      ▼                                ▼
//! ┌───────────────────────────────────────────────┐
//! │                  ghost table                  │
//! └───────────────────────────────────────────────┘
//!                        │ RENAME TABLE source TO retired, ghost TO source
//!                        ▼
//!                   new `source`
//! ```
//!
//! Triggers are installed before the backfill starts, so every write made
//! while rows are being copied lands in the changes table and is applied to
//! the ghost by replay. The cutover replays whatever arrived after the main
//! pass under `LOCK TABLES` and renames both tables in the same statement.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hadron_migrate::{Migration, MigrationConfig, MysqlSession, SchemaChange};
//! use hadron_mysql::MysqlPool;
//!
//! async fn add_flag(pool: &MysqlPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let session = MysqlSession::open(pool).await?;
//!
//!     let report = Migration::new(
//!         &session,
//!         "users",
//!         vec![SchemaChange::add_column("flagged", "TINYINT(1) NOT NULL DEFAULT 0")],
//!     )
//!     .with_config(MigrationConfig::from_file("hadron.toml")?)
//!     .run()
//!     .await?;
//!
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Building blocks
//!
//! Each step is also usable on its own: [`clone_table`],
//! [`clone_table_for_changes`], [`add_trigger_on_action`], [`Backfill`],
//! [`replay_all`] and [`rename_tables`]. All of them talk to the database
//! through the [`SqlExecutor`] trait.

pub mod backfill;
pub mod changes;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod naming;
pub mod replay;
pub mod schema;
pub mod swap;
pub mod trigger;

#[cfg(test)]
mod testing;

// Re-exports
pub use backfill::{Backfill, BackfillProgress};
pub use changes::{ACTION_COLUMN, CHANGE_ID_COLUMN, clone_table_for_changes};
pub use config::{DEFAULT_CHUNK_SIZE, MigrationConfig};
pub use engine::{
    CloneGhostBuilder, GhostBuilder, Migration, MigrationPhase, MigrationReport, MigrationRun,
};
pub use error::{MigrateResult, MigrationError};
pub use executor::{MysqlSession, SqlExecutor};
pub use naming::{TableNames, format_time, trigger_name};
pub use replay::{
    ChangeReplay, ChangeWindow, ReplayStats, last_change_id, replay_all, replay_delete_changes,
    replay_insert_changes, replay_update_changes,
};
pub use schema::{SchemaChange, TableDefinition, clone_table, drop_table, schema_sql, table_exists};
pub use swap::{rename_plan, rename_tables};
pub use trigger::{
    TriggerAction, add_trigger_on_action, cleanup as cleanup_triggers, installed_triggers,
    remove_triggers,
};
