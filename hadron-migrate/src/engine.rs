//! Migration orchestrator.
//!
//! [`Migration`] drives one online schema change from start to finish:
//!
//! 1. build the ghost table with the new schema
//! 2. build the changes table
//! 3. install the capture triggers
//! 4. backfill existing rows into the ghost
//! 5. replay captured changes
//! 6. cut over: lock, replay what arrived since step 5, atomic rename, unlock
//! 7. clean up triggers, the changes table and the retired table
//!
//! A failure before the rename rolls back everything the run created and
//! leaves the source table exactly as it was, apart from the triggers that
//! rollback removes again.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::backfill::{Backfill, BackfillProgress};
use crate::changes::clone_table_for_changes;
use crate::config::MigrationConfig;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::SqlExecutor;
use crate::naming::{TableNames, quote_identifier};
use crate::replay::{ChangeReplay, ChangeWindow, ReplayStats, last_change_id};
use crate::schema::{SchemaChange, clone_table, drop_table};
use crate::swap::rename_tables;
use crate::trigger::{TriggerAction, add_trigger_on_action, remove_triggers};

/// Where a migration run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MigrationPhase {
    /// Nothing has been created yet.
    Init,
    /// The ghost table exists with the target schema.
    GhostCreated,
    /// The changes table exists.
    ChangesCreated,
    /// Capture triggers are active on the source.
    TriggersInstalled,
    /// Every pre-existing row has been copied.
    Backfilled,
    /// Captured changes have been applied to the ghost.
    Replayed,
    /// The ghost has replaced the source.
    Swapped,
    /// Bookkeeping objects have been removed.
    CleanedUp,
    /// The run was aborted and rolled back.
    Failed,
}

impl MigrationPhase {
    /// The phase that must follow this one on success.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::GhostCreated),
            Self::GhostCreated => Some(Self::ChangesCreated),
            Self::ChangesCreated => Some(Self::TriggersInstalled),
            Self::TriggersInstalled => Some(Self::Backfilled),
            Self::Backfilled => Some(Self::Replayed),
            Self::Replayed => Some(Self::Swapped),
            Self::Swapped => Some(Self::CleanedUp),
            Self::CleanedUp | Self::Failed => None,
        }
    }

    /// Whether the run has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CleanedUp | Self::Failed)
    }

    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::GhostCreated => "ghost_created",
            Self::ChangesCreated => "changes_created",
            Self::TriggersInstalled => "triggers_installed",
            Self::Backfilled => "backfilled",
            Self::Replayed => "replayed",
            Self::Swapped => "swapped",
            Self::CleanedUp => "cleaned_up",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationRun {
    /// Tables involved in the run.
    pub names: TableNames,
    phase: MigrationPhase,
}

impl MigrationRun {
    /// Start a run in [`MigrationPhase::Init`].
    pub fn new(names: TableNames) -> Self {
        Self {
            names,
            phase: MigrationPhase::Init,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Move to `to`, which must be the next phase or [`MigrationPhase::Failed`].
    pub fn advance(&mut self, to: MigrationPhase) -> MigrateResult<()> {
        let allowed = if to == MigrationPhase::Failed {
            !self.phase.is_terminal()
        } else {
            self.phase.next() == Some(to)
        };
        if !allowed {
            return Err(MigrationError::InvalidTransition {
                from: self.phase,
                to,
            });
        }

        info!(source = %self.names.source, from = %self.phase, to = %to, "Migration phase");
        self.phase = to;
        Ok(())
    }
}

/// Builds the ghost table for a run.
///
/// Either the ghost exists with the target schema when this returns `Ok`, or
/// it does not exist at all.
#[async_trait]
pub trait GhostBuilder: Send + Sync {
    /// Create `ghost` from `source` with `changes` applied.
    async fn create_ghost(
        &self,
        db: &dyn SqlExecutor,
        source: &str,
        ghost: &str,
        changes: &[SchemaChange],
        primary_key: &str,
    ) -> MigrateResult<()>;
}

/// Default [`GhostBuilder`]: clone the source definition, then alter it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneGhostBuilder;

#[async_trait]
impl GhostBuilder for CloneGhostBuilder {
    async fn create_ghost(
        &self,
        db: &dyn SqlExecutor,
        source: &str,
        ghost: &str,
        changes: &[SchemaChange],
        primary_key: &str,
    ) -> MigrateResult<()> {
        clone_table(db, source, ghost, changes, primary_key).await
    }
}

/// Result of a completed migration.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Tables involved in the run.
    pub names: TableNames,
    /// Rows copied by the backfill.
    pub rows_backfilled: u64,
    /// Backfill chunk statements executed.
    pub backfill_chunks: u64,
    /// Times the backfill was resumed after a transient failure.
    pub backfill_retries: u32,
    /// Totals over every replay pass.
    pub replay: ReplayStats,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Non-fatal problems, mostly from cleanup.
    pub warnings: Vec<String>,
}

impl MigrationReport {
    /// One-line description of the run.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Migrated `{}`: {} rows backfilled, {} inserted, {} updated, {} deleted by replay in {}ms",
            self.names.source,
            self.rows_backfilled,
            self.replay.inserted,
            self.replay.updated,
            self.replay.deleted,
            self.duration_ms
        );
        if !self.warnings.is_empty() {
            summary.push_str(&format!(" ({} warnings)", self.warnings.len()));
        }
        summary
    }
}

/// An online schema change of one table.
///
/// ```rust,ignore
/// let session = MysqlSession::open(&pool).await?;
/// let report = Migration::new(&session, "users", vec![SchemaChange::add_column("spam", "TINYINT(1)")])
///     .with_config(MigrationConfig::new().chunk_size(5_000))
///     .run()
///     .await?;
/// println!("{}", report.summary());
/// ```
pub struct Migration<'a> {
    db: &'a dyn SqlExecutor,
    source: String,
    changes: Vec<SchemaChange>,
    config: MigrationConfig,
    ghost_builder: Box<dyn GhostBuilder + 'a>,
    names: Option<TableNames>,
}

impl<'a> Migration<'a> {
    /// Prepare a migration applying `changes` to `source`.
    pub fn new(db: &'a dyn SqlExecutor, source: impl Into<String>, changes: Vec<SchemaChange>) -> Self {
        Self {
            db,
            source: source.into(),
            changes,
            config: MigrationConfig::default(),
            ghost_builder: Box::new(CloneGhostBuilder),
            names: None,
        }
    }

    /// Use `config` instead of the defaults.
    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the step that creates the ghost table.
    pub fn with_ghost_builder(mut self, builder: impl GhostBuilder + 'a) -> Self {
        self.ghost_builder = Box::new(builder);
        self
    }

    /// Use pre-computed table names instead of deriving them from the clock.
    ///
    /// The names' source must match the migrated table.
    pub fn with_names(mut self, names: TableNames) -> Self {
        self.names = Some(names);
        self
    }

    /// Run the migration to completion.
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn run(self) -> MigrateResult<MigrationReport> {
        self.config.validate()?;
        let names = match self.names.clone() {
            Some(names) if names.source == self.source => names,
            Some(names) => {
                return Err(MigrationError::invalid_name(format!(
                    "names were derived for `{}`, not `{}`",
                    names.source, self.source
                )));
            }
            None => TableNames::now(self.source.as_str())?,
        };

        let start = Instant::now();
        let mut run = MigrationRun::new(names.clone());
        let mut report = MigrationReport {
            names,
            rows_backfilled: 0,
            backfill_chunks: 0,
            backfill_retries: 0,
            replay: ReplayStats::default(),
            duration_ms: 0,
            warnings: Vec::new(),
        };

        info!(
            ghost = %run.names.ghost,
            changes = %run.names.changes,
            modifications = self.changes.len(),
            "Starting online migration"
        );

        if let Err(e) = self.migrate(&mut run, &mut report).await {
            warn!(phase = %run.phase(), error = %e, "Migration failed");
            if run.phase() < MigrationPhase::Swapped {
                self.rollback(&run).await;
            }
            if let Err(transition) = run.advance(MigrationPhase::Failed) {
                warn!(error = %transition, "Could not mark run as failed");
            }
            return Err(e);
        }

        self.cleanup(&run, &mut report.warnings).await;
        run.advance(MigrationPhase::CleanedUp)?;

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!("{}", report.summary());
        Ok(report)
    }

    async fn migrate(&self, run: &mut MigrationRun, report: &mut MigrationReport) -> MigrateResult<()> {
        let names = run.names.clone();
        let pk = self.config.primary_key.as_str();

        self.ghost_builder
            .create_ghost(self.db, &names.source, &names.ghost, &self.changes, pk)
            .await?;
        run.advance(MigrationPhase::GhostCreated)?;

        clone_table_for_changes(self.db, &names.source, &names.changes, pk).await?;
        run.advance(MigrationPhase::ChangesCreated)?;

        for action in TriggerAction::ALL {
            add_trigger_on_action(self.db, &names, action).await?;
        }
        run.advance(MigrationPhase::TriggersInstalled)?;

        let progress = self.backfill(&names, &mut report.backfill_retries).await?;
        report.rows_backfilled = progress.rows_copied;
        report.backfill_chunks = progress.chunks;
        run.advance(MigrationPhase::Backfilled)?;

        let mark = last_change_id(self.db, &names.changes).await?;
        if let Some(mark) = mark {
            report
                .replay
                .merge(self.replay(&names, ChangeWindow::up_to(mark)).run().await?);
        }
        run.advance(MigrationPhase::Replayed)?;

        report
            .replay
            .merge(self.cutover(&names, mark, &mut report.warnings).await?);
        run.advance(MigrationPhase::Swapped)?;

        Ok(())
    }

    fn replay(&self, names: &TableNames, window: ChangeWindow) -> ChangeReplay<'a> {
        ChangeReplay::new(self.db, names.ghost.as_str(), names.changes.as_str())
            .primary_key(self.config.primary_key.as_str())
            .window(window)
    }

    /// Copy existing rows, resuming after transient chunk failures.
    async fn backfill(&self, names: &TableNames, retries: &mut u32) -> MigrateResult<BackfillProgress> {
        let backfill = Backfill::new(self.db, names.source.as_str(), names.ghost.as_str())
            .primary_key(self.config.primary_key.as_str())
            .chunk_size(self.config.chunk_size)
            .chunk_delay(self.config.chunk_delay_duration());
        let mut progress = BackfillProgress::default();

        loop {
            match backfill.run_into(&mut progress).await {
                Ok(()) => return Ok(progress),
                Err(e) if e.is_recoverable() && *retries < self.config.max_backfill_retries => {
                    *retries += 1;
                    warn!(
                        attempt = *retries,
                        last_copied_key = ?progress.last_copied_key,
                        error = %e,
                        "Backfill failed, resuming"
                    );
                    let delay = self.config.retry_delay_duration();
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replay records newer than `mark`, then rename, under table locks when
    /// configured.
    ///
    /// Returns `Ok` once the rename has succeeded; a failed unlock after that
    /// only adds a warning.
    async fn cutover(
        &self,
        names: &TableNames,
        mark: Option<u64>,
        warnings: &mut Vec<String>,
    ) -> MigrateResult<ReplayStats> {
        let catch_up = self.replay(names, ChangeWindow::after(mark));
        let mapping = [
            (names.source.as_str(), names.retired.as_str()),
            (names.ghost.as_str(), names.source.as_str()),
        ];

        if !self.config.lock_cutover {
            let stats = catch_up.run().await?;
            rename_tables(self.db, &mapping).await?;
            return Ok(stats);
        }

        let lock = format!(
            "LOCK TABLES {} WRITE, {} WRITE, {} WRITE",
            quote_identifier(&names.source),
            quote_identifier(&names.ghost),
            quote_identifier(&names.changes)
        );
        self.db.execute(&lock, Vec::new()).await?;

        let result = async {
            let stats = catch_up.run().await?;
            rename_tables(self.db, &mapping).await?;
            Ok::<_, MigrationError>(stats)
        }
        .await;

        let unlocked = self.db.execute("UNLOCK TABLES", Vec::new()).await;
        let stats = match (result, unlocked) {
            (Err(e), Err(unlock)) => {
                warn!(error = %unlock, "Could not unlock tables after failed cutover");
                return Err(e);
            }
            (Err(e), Ok(_)) => return Err(e),
            (Ok(stats), Err(unlock)) => {
                warn!(error = %unlock, "Could not unlock tables after rename");
                warnings.push(format!("tables not unlocked after rename: {}", unlock));
                stats
            }
            (Ok(stats), Ok(_)) => stats,
        };
        info!(
            source = %names.source,
            retired = %names.retired,
            after = ?mark,
            "Cutover complete"
        );
        Ok(stats)
    }

    /// Undo everything created before the swap. Never touches the source data.
    async fn rollback(&self, run: &MigrationRun) {
        let names = &run.names;
        info!(phase = %run.phase(), "Rolling back migration");

        if let Err(e) = remove_triggers(self.db, names).await {
            warn!(error = %e, "Could not remove triggers during rollback");
        }
        for table in [&names.ghost, &names.changes] {
            if let Err(e) = drop_table(self.db, table).await {
                warn!(table = %table, error = %e, "Could not drop table during rollback");
            }
        }
    }

    /// Remove bookkeeping objects after the swap.
    async fn cleanup(&self, run: &MigrationRun, warnings: &mut Vec<String>) {
        let names = &run.names;

        // The triggers moved with the retired table; they are dropped by name.
        if let Err(e) = remove_triggers(self.db, names).await {
            warn!(error = %e, "Could not remove triggers");
            warnings.push(format!("triggers on `{}` not removed: {}", names.retired, e));
        }

        if let Err(e) = drop_table(self.db, &names.changes).await {
            warn!(table = %names.changes, error = %e, "Could not drop changes table");
            warnings.push(format!("changes table `{}` not dropped: {}", names.changes, e));
        }

        if self.config.keep_retired_table {
            info!(retired = %names.retired, "Keeping retired table");
        } else if let Err(e) = drop_table(self.db, &names.retired).await {
            warn!(table = %names.retired, error = %e, "Could not drop retired table");
            warnings.push(format!("retired table `{}` not dropped: {}", names.retired, e));
        }
    }
}
