//! Replaying captured change records onto a target table.
//!
//! Only the most recent record of each key counts: its action decides
//! whether the key ends up inserted, overwritten or deleted, so any history
//! (insert then delete, delete then re-insert, repeated updates) settles on
//! what the source holds. Replay always runs insert, then update, then
//! delete, and each step is idempotent.
//!
//! A pass can be limited to a [`ChangeWindow`] of `hadron_change_id` values.
//! The cutover uses this to replay only what arrived after the main pass.

use hadron_mysql::Value;
use tracing::{debug, info};

use crate::changes::{ACTION_COLUMN, BOOKKEEPING_PREFIX, CHANGE_ID_COLUMN};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, value_as_i64};
use crate::naming::quote_identifier;
use crate::schema::table_columns;
use crate::trigger::TriggerAction;

/// Maximum keys bound into one `DELETE ... IN (...)` statement.
pub const DELETE_BATCH_SIZE: usize = 1_000;

const LATEST_ALIAS: &str = "hadron_latest";
const RANK_COLUMN: &str = "hadron_rank";
const REINSERTED_COLUMN: &str = "hadron_reinserted";

/// Rows affected by each replay step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Rows inserted by the insert step.
    pub inserted: u64,
    /// Rows written by the update step, as reported by `REPLACE`.
    pub updated: u64,
    /// Rows removed by the delete step.
    pub deleted: u64,
}

impl ReplayStats {
    /// Accumulate another pass.
    pub fn merge(&mut self, other: ReplayStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// A range of change records, by `hadron_change_id`: `(after, up_to]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeWindow {
    /// Exclusive lower bound; `None` starts at the first record.
    pub after: Option<u64>,
    /// Inclusive upper bound; `None` runs to the last record.
    pub up_to: Option<u64>,
}

impl ChangeWindow {
    /// Every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Records up to and including `mark`.
    pub fn up_to(mark: u64) -> Self {
        Self {
            after: None,
            up_to: Some(mark),
        }
    }

    /// Records after `mark`, or every record when `mark` is `None`.
    pub fn after(mark: Option<u64>) -> Self {
        Self {
            after: mark,
            up_to: None,
        }
    }

    /// `WHERE` clause (with leading space) and its bound values.
    fn filter(&self) -> (String, Vec<Value>) {
        let id = quote_identifier(CHANGE_ID_COLUMN);
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(after) = self.after {
            conditions.push(format!("{} > ?", id));
            params.push(Value::from(after));
        }
        if let Some(up_to) = self.up_to {
            conditions.push(format!("{} <= ?", id));
            params.push(Value::from(up_to));
        }
        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

/// Highest `hadron_change_id` recorded so far, or `None` for an empty log.
pub async fn last_change_id(db: &dyn SqlExecutor, changes: &str) -> MigrateResult<Option<u64>> {
    let sql = format!(
        "SELECT MAX({}) FROM {}",
        quote_identifier(CHANGE_ID_COLUMN),
        quote_identifier(changes)
    );
    Ok(value_as_i64(db.select_value(&sql, Vec::new()).await?)?.map(|id| id.max(0) as u64))
}

/// Applies the records of a changes table to a target table.
pub struct ChangeReplay<'a> {
    db: &'a dyn SqlExecutor,
    target: String,
    changes: String,
    primary_key: String,
    window: ChangeWindow,
}

impl<'a> ChangeReplay<'a> {
    /// Replay every record of `changes` onto `target`, keyed by `id`.
    pub fn new(db: &'a dyn SqlExecutor, target: impl Into<String>, changes: impl Into<String>) -> Self {
        Self {
            db,
            target: target.into(),
            changes: changes.into(),
            primary_key: "id".to_string(),
            window: ChangeWindow::all(),
        }
    }

    /// Set the primary key column records are grouped by.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Only consider records inside `window`.
    pub fn window(mut self, window: ChangeWindow) -> Self {
        self.window = window;
        self
    }

    /// Insert keys whose latest record is an insert; keys already present
    /// are skipped.
    pub async fn insert_changes(&self) -> MigrateResult<u64> {
        let columns = self.shared_columns().await?;
        let condition = format!("{} = ?", quote_identifier(ACTION_COLUMN));
        let (sql, mut params) = self.copy_sql("INSERT IGNORE", &columns, &condition);
        params.push(Value::from(TriggerAction::Insert.as_str()));

        let affected = self.db.execute(&sql, params).await?;
        debug!(target = %self.target, affected, "Replayed inserts");
        Ok(affected)
    }

    /// Overwrite keys whose latest record is an update, or an insert that
    /// follows a delete of the same key, with that record's values.
    pub async fn update_changes(&self) -> MigrateResult<u64> {
        let columns = self.shared_columns().await?;
        let action = quote_identifier(ACTION_COLUMN);
        let condition = format!(
            "({} = ? OR ({} = ? AND {} = 1))",
            action,
            action,
            quote_identifier(REINSERTED_COLUMN)
        );
        let (sql, mut params) = self.copy_sql("REPLACE", &columns, &condition);
        params.push(Value::from(TriggerAction::Update.as_str()));
        params.push(Value::from(TriggerAction::Insert.as_str()));

        let affected = self.db.execute(&sql, params).await?;
        debug!(target = %self.target, affected, "Replayed updates");
        Ok(affected)
    }

    /// Delete keys whose latest record is a delete.
    ///
    /// Issues no statement at all when there are no such keys.
    pub async fn delete_changes(&self) -> MigrateResult<u64> {
        let pk = quote_identifier(&self.primary_key);
        let (filter, mut params) = self.window.filter();
        params.push(Value::from(TriggerAction::Delete.as_str()));
        let sql = format!(
            "SELECT {} FROM (SELECT {}, {}, {} FROM {}{}) AS {} WHERE {} = 1 AND {} = ?",
            pk,
            pk,
            quote_identifier(ACTION_COLUMN),
            self.rank_sql(),
            quote_identifier(&self.changes),
            filter,
            quote_identifier(LATEST_ALIAS),
            quote_identifier(RANK_COLUMN),
            quote_identifier(ACTION_COLUMN)
        );
        let keys = self.db.select_values(&sql, params).await?;

        if keys.is_empty() {
            debug!(target = %self.target, "No deletes to replay");
            return Ok(0);
        }

        let mut deleted = 0;
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote_identifier(&self.target),
                pk,
                placeholders
            );
            deleted += self.db.execute(&sql, batch.to_vec()).await?;
        }

        debug!(target = %self.target, keys = keys.len(), deleted, "Replayed deletes");
        Ok(deleted)
    }

    /// Run insert, update and delete in order.
    pub async fn run(&self) -> MigrateResult<ReplayStats> {
        let stats = ReplayStats {
            inserted: self.insert_changes().await?,
            updated: self.update_changes().await?,
            deleted: self.delete_changes().await?,
        };
        info!(
            target = %self.target,
            after = ?self.window.after,
            up_to = ?self.window.up_to,
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            "Replayed changes"
        );
        Ok(stats)
    }

    /// Rank of each record among its key's records, newest first.
    fn rank_sql(&self) -> String {
        format!(
            "ROW_NUMBER() OVER (PARTITION BY {} ORDER BY {} DESC) AS {}",
            quote_identifier(&self.primary_key),
            quote_identifier(CHANGE_ID_COLUMN),
            quote_identifier(RANK_COLUMN)
        )
    }

    /// `<verb> INTO target (cols) SELECT cols` from each key's latest record
    /// matching `condition`. Returns the window's bound values; the caller
    /// appends those of `condition`.
    fn copy_sql(&self, verb: &str, columns: &[String], condition: &str) -> (String, Vec<Value>) {
        let cols = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let action = quote_identifier(ACTION_COLUMN);
        let (filter, params) = self.window.filter();
        let sql = format!(
            "{} INTO {} ({}) SELECT {} FROM (SELECT {}, {}, {}, \
             MAX({} = '{}') OVER (PARTITION BY {}) AS {} FROM {}{}) AS {} WHERE {} = 1 AND {}",
            verb,
            quote_identifier(&self.target),
            cols,
            cols,
            cols,
            action,
            self.rank_sql(),
            action,
            TriggerAction::Delete.as_str(),
            quote_identifier(&self.primary_key),
            quote_identifier(REINSERTED_COLUMN),
            quote_identifier(&self.changes),
            filter,
            quote_identifier(LATEST_ALIAS),
            quote_identifier(RANK_COLUMN),
            condition
        );
        (sql, params)
    }

    async fn shared_columns(&self) -> MigrateResult<Vec<String>> {
        let change_columns = table_columns(self.db, &self.changes).await?;
        if !change_columns.iter().any(|c| c == CHANGE_ID_COLUMN) {
            return Err(MigrationError::replay(format!(
                "`{}` has no `{}` column",
                self.changes, CHANGE_ID_COLUMN
            )));
        }
        let target_columns = table_columns(self.db, &self.target).await?;

        let columns: Vec<String> = change_columns
            .into_iter()
            .filter(|c| !c.starts_with(BOOKKEEPING_PREFIX) && target_columns.contains(c))
            .collect();
        if columns.is_empty() {
            return Err(MigrationError::replay(format!(
                "`{}` and `{}` share no columns",
                self.changes, self.target
            )));
        }
        Ok(columns)
    }
}

/// Insert keys whose latest record is an insert; keys already present are
/// skipped.
pub async fn replay_insert_changes(
    db: &dyn SqlExecutor,
    target: &str,
    changes: &str,
    primary_key: &str,
) -> MigrateResult<u64> {
    ChangeReplay::new(db, target, changes)
        .primary_key(primary_key)
        .insert_changes()
        .await
}

/// Upsert keys whose latest record is an update, latest captured value wins.
pub async fn replay_update_changes(
    db: &dyn SqlExecutor,
    target: &str,
    changes: &str,
    primary_key: &str,
) -> MigrateResult<u64> {
    ChangeReplay::new(db, target, changes)
        .primary_key(primary_key)
        .update_changes()
        .await
}

/// Delete keys whose latest record is a delete.
///
/// Issues no statement at all when there are none.
pub async fn replay_delete_changes(
    db: &dyn SqlExecutor,
    target: &str,
    changes: &str,
    primary_key: &str,
) -> MigrateResult<u64> {
    ChangeReplay::new(db, target, changes)
        .primary_key(primary_key)
        .delete_changes()
        .await
}

/// Run insert, update and delete replay in order over the whole log.
pub async fn replay_all(
    db: &dyn SqlExecutor,
    target: &str,
    changes: &str,
    primary_key: &str,
) -> MigrateResult<ReplayStats> {
    ChangeReplay::new(db, target, changes)
        .primary_key(primary_key)
        .run()
        .await
}
