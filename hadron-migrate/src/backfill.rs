//! Chunked copy of existing rows from the source into the ghost table.
//!
//! Rows are copied in ascending primary-key ranges with `INSERT IGNORE ...
//! SELECT`, so each statement only locks one bounded range and re-running a
//! range is harmless. The key bounds are read once when the copy starts;
//! anything written after that is reconciled by replay, never by rescanning.

use std::time::Duration;

use hadron_mysql::Value;
use tracing::{debug, info};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, value_as_i64};
use crate::naming::quote_identifier;
use crate::schema::table_columns;

/// Outcome of a (possibly resumed) backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillProgress {
    /// Upper bound of the last range copied, if any.
    pub last_copied_key: Option<i64>,
    /// Rows inserted into the ghost table.
    pub rows_copied: u64,
    /// Chunk statements executed.
    pub chunks: u64,
}

/// Copies `source` into `ghost` in bounded primary-key ranges.
pub struct Backfill<'a> {
    db: &'a dyn SqlExecutor,
    source: String,
    ghost: String,
    primary_key: String,
    chunk_size: u64,
    chunk_delay: Duration,
    start_after: Option<i64>,
}

impl<'a> Backfill<'a> {
    /// Create a backfill with default chunking over the `id` column.
    pub fn new(db: &'a dyn SqlExecutor, source: impl Into<String>, ghost: impl Into<String>) -> Self {
        Self {
            db,
            source: source.into(),
            ghost: ghost.into(),
            primary_key: "id".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::ZERO,
            start_after: None,
        }
    }

    /// Set the integer primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Set the primary-key span per chunk.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Pause between chunks.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Skip every key up to and including `key`.
    pub fn resume_from(mut self, key: Option<i64>) -> Self {
        self.start_after = key;
        self
    }

    /// Build the chunk statement; binds `(lower, upper]`.
    pub fn chunk_sql(&self, columns: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let pk = quote_identifier(&self.primary_key);
        format!(
            "INSERT IGNORE INTO {} ({}) SELECT {} FROM {} WHERE {} > ? AND {} <= ? ORDER BY {}",
            quote_identifier(&self.ghost),
            cols,
            cols,
            quote_identifier(&self.source),
            pk,
            pk,
            pk
        )
    }

    /// Copy every remaining range.
    ///
    /// On failure the error carries the last fully copied key; pass it to
    /// [`resume_from`](Self::resume_from) to continue.
    pub async fn run(&self) -> MigrateResult<BackfillProgress> {
        let mut progress = BackfillProgress {
            last_copied_key: self.start_after,
            ..Default::default()
        };
        self.run_into(&mut progress).await?;
        Ok(progress)
    }

    /// Copy every range after `progress.last_copied_key`, updating `progress`
    /// chunk by chunk so it stays accurate when a chunk fails.
    pub async fn run_into(&self, progress: &mut BackfillProgress) -> MigrateResult<()> {
        if self.chunk_size == 0 {
            return Err(MigrationError::config("chunk_size must be greater than zero"));
        }

        let columns = self.shared_columns().await?;
        let Some((min, max)) = self.key_bounds().await? else {
            info!(source = %self.source, "Source is empty, nothing to backfill");
            return Ok(());
        };

        let sql = self.chunk_sql(&columns);
        let chunk = i64::try_from(self.chunk_size).unwrap_or(i64::MAX);
        let mut lower = progress
            .last_copied_key
            .unwrap_or(min.saturating_sub(1));

        while lower < max {
            let upper = lower.saturating_add(chunk).min(max);
            let copied = self
                .db
                .execute(&sql, vec![Value::from(lower), Value::from(upper)])
                .await
                .map_err(|e| MigrationError::backfill(progress.last_copied_key, e))?;

            progress.last_copied_key = Some(upper);
            progress.rows_copied += copied;
            progress.chunks += 1;
            debug!(lower, upper, copied, "Backfilled chunk");

            lower = upper;
            if lower < max && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        info!(
            source = %self.source,
            ghost = %self.ghost,
            rows = progress.rows_copied,
            chunks = progress.chunks,
            "Backfill complete"
        );
        Ok(())
    }

    /// Source columns that still exist in the ghost, in source order.
    async fn shared_columns(&self) -> MigrateResult<Vec<String>> {
        let source = table_columns(self.db, &self.source).await?;
        let ghost = table_columns(self.db, &self.ghost).await?;
        let shared: Vec<String> = source.into_iter().filter(|c| ghost.contains(c)).collect();

        if !shared.contains(&self.primary_key) {
            return Err(MigrationError::schema(format!(
                "primary key `{}` must exist in both `{}` and `{}`",
                self.primary_key, self.source, self.ghost
            )));
        }
        Ok(shared)
    }

    async fn key_bounds(&self) -> MigrateResult<Option<(i64, i64)>> {
        let pk = quote_identifier(&self.primary_key);
        let table = quote_identifier(&self.source);
        let min = value_as_i64(
            self.db
                .select_value(&format!("SELECT MIN({}) FROM {}", pk, table), Vec::new())
                .await?,
        )?;
        let max = value_as_i64(
            self.db
                .select_value(&format!("SELECT MAX({}) FROM {}", pk, table), Vec::new())
                .await?,
        )?;
        Ok(min.zip(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;
    use pretty_assertions::assert_eq;

    fn executor(min: i64, max: i64) -> RecordingExecutor {
        RecordingExecutor::new()
            .with_columns("src", &["id", "title", "legacy"])
            .with_columns("src_ghost", &["id", "title", "spam"])
            .respond("SELECT MIN(`id`)", vec![Value::Int(min)])
            .respond("SELECT MAX(`id`)", vec![Value::Int(max)])
    }

    fn chunk_bounds(db: &RecordingExecutor) -> Vec<(Value, Value)> {
        db.calls()
            .into_iter()
            .filter(|c| c.sql.starts_with("INSERT IGNORE"))
            .map(|c| (c.params[0].clone(), c.params[1].clone()))
            .collect()
    }

    #[test]
    fn test_chunk_sql_uses_shared_columns() {
        let db = RecordingExecutor::new();
        let backfill = Backfill::new(&db, "src", "src_ghost");
        assert_eq!(
            backfill.chunk_sql(&["id".to_string(), "title".to_string()]),
            "INSERT IGNORE INTO `src_ghost` (`id`, `title`) SELECT `id`, `title` FROM `src` \
             WHERE `id` > ? AND `id` <= ? ORDER BY `id`"
        );
    }

    #[tokio::test]
    async fn test_copies_in_ascending_bounded_chunks() {
        let db = executor(1, 420);
        let progress = Backfill::new(&db, "src", "src_ghost")
            .chunk_size(200)
            .run()
            .await
            .unwrap();

        assert_eq!(progress.chunks, 3);
        assert_eq!(progress.last_copied_key, Some(420));
        assert_eq!(
            chunk_bounds(&db),
            vec![
                (Value::Int(0), Value::Int(200)),
                (Value::Int(200), Value::Int(400)),
                (Value::Int(400), Value::Int(420)),
            ]
        );
        let insert = db.statements().into_iter().find(|s| s.starts_with("INSERT")).unwrap();
        assert!(insert.contains("(`id`, `title`)"));
        assert!(!insert.contains("legacy"));
    }

    #[tokio::test]
    async fn test_empty_source_issues_no_copy() {
        let db = RecordingExecutor::new()
            .with_columns("src", &["id"])
            .with_columns("src_ghost", &["id"]);

        let progress = Backfill::new(&db, "src", "src_ghost").run().await.unwrap();

        assert_eq!(progress, BackfillProgress::default());
        assert!(db.writes().is_empty());
    }

    #[tokio::test]
    async fn test_failure_reports_resume_point_and_resumes() {
        let db = executor(1, 30).fail_once("INSERT IGNORE");

        // First chunk fails outright: nothing copied yet.
        let err = Backfill::new(&db, "src", "src_ghost")
            .chunk_size(10)
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.resume_key(), Some(None));

        let progress = Backfill::new(&db, "src", "src_ghost")
            .chunk_size(10)
            .resume_from(Some(10))
            .run()
            .await
            .unwrap();

        assert_eq!(progress.chunks, 2);
        assert_eq!(
            chunk_bounds(&db).last().unwrap(),
            &(Value::Int(20), Value::Int(30))
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_primary_key() {
        let db = RecordingExecutor::new()
            .with_columns("src", &["uuid", "title"])
            .with_columns("src_ghost", &["uuid", "title"]);

        let result = Backfill::new(&db, "src", "src_ghost").run().await;
        assert!(matches!(result, Err(MigrationError::Schema(_))));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_rejected() {
        let db = executor(1, 5);
        let result = Backfill::new(&db, "src", "src_ghost").chunk_size(0).run().await;
        assert!(matches!(result, Err(MigrationError::Config(_))));
    }
}
