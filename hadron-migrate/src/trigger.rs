//! Triggers that mirror writes on the source table into the changes table.

use std::fmt;
use std::str::FromStr;

use hadron_mysql::Value;
use tracing::{debug, info};

use crate::changes::ACTION_COLUMN;
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, value_as_string};
use crate::naming::{TableNames, quote_identifier};
use crate::schema::{primary_key_columns, table_columns};

/// A row-level write a trigger can capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerAction {
    /// `AFTER INSERT`, captures the new row.
    Insert,
    /// `AFTER UPDATE`, captures the new row.
    Update,
    /// `AFTER DELETE`, captures the old row.
    Delete,
}

impl TriggerAction {
    /// All actions, in replay order.
    pub const ALL: [TriggerAction; 3] = [Self::Insert, Self::Update, Self::Delete];

    /// Lowercase tag stored in the changes table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Trigger event keyword.
    fn event(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Row alias visible inside the trigger body.
    fn row_alias(&self) -> &'static str {
        match self {
            Self::Delete => "OLD",
            Self::Insert | Self::Update => "NEW",
        }
    }
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerAction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(MigrationError::schema(format!(
                "unknown trigger action '{}'",
                other
            ))),
        }
    }
}

/// Build the `CREATE TRIGGER` statement for one action.
///
/// With `key_columns` given, the update trigger also records the old row as
/// a delete whenever an update changes the primary key, so the old key does
/// not outlive the migration.
pub fn trigger_sql(
    trigger: &str,
    source: &str,
    changes_table: &str,
    action: TriggerAction,
    columns: &[String],
    key_columns: &[String],
) -> String {
    let record = record_sql(changes_table, action, action.row_alias(), columns);
    let statement = if action == TriggerAction::Update && !key_columns.is_empty() {
        let unchanged = key_columns
            .iter()
            .map(|c| {
                let column = quote_identifier(c);
                format!("OLD.{} <=> NEW.{}", column, column)
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            "BEGIN IF NOT ({}) THEN {}; END IF; {}; END",
            unchanged,
            record_sql(changes_table, TriggerAction::Delete, "OLD", columns),
            record
        )
    } else {
        record
    };

    format!(
        "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW {}",
        quote_identifier(trigger),
        action.event(),
        quote_identifier(source),
        statement
    )
}

fn record_sql(changes_table: &str, tag: TriggerAction, alias: &str, columns: &[String]) -> String {
    let mut targets = vec![quote_identifier(ACTION_COLUMN)];
    let mut values = vec![format!("'{}'", tag.as_str())];
    for column in columns {
        targets.push(quote_identifier(column));
        values.push(format!("{}.{}", alias, quote_identifier(column)));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(changes_table),
        targets.join(", "),
        values.join(", ")
    )
}

/// Install the run's trigger copying every `action` on `names.source` into
/// `names.changes`.
///
/// The run's previous trigger for the same action is replaced, so at most one
/// is active per run and action. Triggers of other runs are left alone.
pub async fn add_trigger_on_action(
    db: &dyn SqlExecutor,
    names: &TableNames,
    action: TriggerAction,
) -> MigrateResult<()> {
    let columns = table_columns(db, &names.source).await?;
    let key_columns = primary_key_columns(db, &names.source).await?;
    let trigger = names.trigger(action);

    drop_trigger(db, &trigger).await?;
    db.execute(
        &trigger_sql(
            &trigger,
            &names.source,
            &names.changes,
            action,
            &columns,
            &key_columns,
        ),
        Vec::new(),
    )
    .await?;

    info!(
        source = %names.source,
        changes = %names.changes,
        trigger = %trigger,
        "Trigger installed"
    );
    Ok(())
}

/// Remove the triggers one run installed. Safe to call when none exist.
///
/// Works by name, so it also finds triggers that followed the source table
/// through a rename.
pub async fn remove_triggers(db: &dyn SqlExecutor, names: &TableNames) -> MigrateResult<()> {
    for action in TriggerAction::ALL {
        drop_trigger(db, &names.trigger(action)).await?;
    }
    info!(source = %names.source, run = %names.timestamp, "Triggers removed");
    Ok(())
}

/// Names of every change-capture trigger currently defined on `source`,
/// whichever run installed it.
pub async fn installed_triggers(db: &dyn SqlExecutor, source: &str) -> MigrateResult<Vec<String>> {
    db.select_values(
        "SELECT TRIGGER_NAME FROM information_schema.TRIGGERS \
         WHERE TRIGGER_SCHEMA = DATABASE() AND EVENT_OBJECT_TABLE = ? \
         AND ACTION_STATEMENT LIKE ? ORDER BY TRIGGER_NAME",
        vec![Value::from(source), Value::from(format!("%{}%", ACTION_COLUMN))],
    )
    .await?
    .into_iter()
    .map(value_as_string)
    .collect()
}

/// Remove every change-capture trigger on `source`, from any run.
///
/// Safe to call when none exist.
pub async fn cleanup(db: &dyn SqlExecutor, source: &str) -> MigrateResult<()> {
    let triggers = installed_triggers(db, source).await?;
    for trigger in &triggers {
        drop_trigger(db, trigger).await?;
    }
    info!(source = %source, removed = triggers.len(), "Triggers removed");
    Ok(())
}

async fn drop_trigger(db: &dyn SqlExecutor, name: &str) -> MigrateResult<()> {
    debug!(trigger = %name, "Dropping trigger if present");
    db.execute(
        &format!("DROP TRIGGER IF EXISTS {}", quote_identifier(name)),
        Vec::new(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<String> {
        ["id", "text", "number"].iter().map(|c| c.to_string()).collect()
    }

    fn names_at(source: &str, hour: u32) -> TableNames {
        let at = NaiveDate::from_ymd_opt(2011, 10, 9)
            .unwrap()
            .and_hms_opt(hour, 7, 56)
            .unwrap();
        TableNames::new(source, at).unwrap()
    }

    #[test]
    fn test_action_round_trip() {
        for action in TriggerAction::ALL {
            assert_eq!(action.as_str().parse::<TriggerAction>().unwrap(), action);
        }
        assert_eq!("DELETE".parse::<TriggerAction>().unwrap(), TriggerAction::Delete);
        assert!("upsert".parse::<TriggerAction>().is_err());
    }

    #[test]
    fn test_insert_trigger_sql() {
        assert_eq!(
            trigger_sql(
                "triggerme_insert",
                "triggerme",
                "triggerme_changes",
                TriggerAction::Insert,
                &columns(),
                &["id".to_string()],
            ),
            "CREATE TRIGGER `triggerme_insert` AFTER INSERT ON `triggerme` FOR EACH ROW \
             INSERT INTO `triggerme_changes` (`hadron_action`, `id`, `text`, `number`) \
             VALUES ('insert', NEW.`id`, NEW.`text`, NEW.`number`)"
        );
    }

    #[test]
    fn test_delete_trigger_captures_old_row() {
        let sql = trigger_sql(
            "t",
            "triggerme",
            "triggerme_changes",
            TriggerAction::Delete,
            &columns(),
            &["id".to_string()],
        );
        assert!(sql.contains("AFTER DELETE"));
        assert!(sql.contains("'delete', OLD.`id`, OLD.`text`, OLD.`number`"));
        assert!(!sql.contains("NEW."));
    }

    #[test]
    fn test_update_trigger_records_key_change_as_delete() {
        let sql = trigger_sql(
            "t",
            "triggerme",
            "triggerme_changes",
            TriggerAction::Update,
            &columns(),
            &["id".to_string()],
        );
        assert_eq!(
            sql,
            "CREATE TRIGGER `t` AFTER UPDATE ON `triggerme` FOR EACH ROW \
             BEGIN IF NOT (OLD.`id` <=> NEW.`id`) THEN \
             INSERT INTO `triggerme_changes` (`hadron_action`, `id`, `text`, `number`) \
             VALUES ('delete', OLD.`id`, OLD.`text`, OLD.`number`); END IF; \
             INSERT INTO `triggerme_changes` (`hadron_action`, `id`, `text`, `number`) \
             VALUES ('update', NEW.`id`, NEW.`text`, NEW.`number`); END"
        );
    }

    #[test]
    fn test_update_trigger_compares_every_key_column() {
        let keys = vec!["tenant".to_string(), "id".to_string()];
        let sql = trigger_sql("t", "s", "c", TriggerAction::Update, &columns(), &keys);
        assert!(sql.contains("IF NOT (OLD.`tenant` <=> NEW.`tenant` AND OLD.`id` <=> NEW.`id`)"));

        let keyless = trigger_sql("t", "s", "c", TriggerAction::Update, &columns(), &[]);
        assert!(!keyless.contains("BEGIN"));
    }

    #[tokio::test]
    async fn test_add_trigger_replaces_existing() {
        let names = names_at("triggerme", 8);
        let db = RecordingExecutor::new().with_columns("triggerme", &["id", "text"]);

        add_trigger_on_action(&db, &names, TriggerAction::Update)
            .await
            .unwrap();

        let writes = db.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0],
            "DROP TRIGGER IF EXISTS `triggerme_update_2011_10_09_08_07_56_000`"
        );
        assert!(writes[1].starts_with(
            "CREATE TRIGGER `triggerme_update_2011_10_09_08_07_56_000` AFTER UPDATE"
        ));
        assert!(writes[1].contains(&format!("INSERT INTO `{}`", names.changes)));
    }

    #[tokio::test]
    async fn test_add_trigger_fails_without_source() {
        let db = RecordingExecutor::new();
        let result =
            add_trigger_on_action(&db, &names_at("missing", 8), TriggerAction::Insert).await;

        assert!(result.is_err());
        assert!(db.writes().is_empty());
    }

    #[tokio::test]
    async fn test_two_runs_keep_separate_triggers() {
        let first = names_at("users", 8);
        let second = names_at("users", 9);
        let db = RecordingExecutor::new().with_columns("users", &["id", "name"]);

        for action in TriggerAction::ALL {
            add_trigger_on_action(&db, &first, action).await.unwrap();
        }
        for action in TriggerAction::ALL {
            add_trigger_on_action(&db, &second, action).await.unwrap();
        }
        remove_triggers(&db, &second).await.unwrap();

        let writes = db.writes();
        for action in TriggerAction::ALL {
            let kept = format!("DROP TRIGGER IF EXISTS `{}`", first.trigger(action));
            assert_eq!(writes.iter().filter(|w| **w == kept).count(), 1);
        }
        assert_eq!(
            &writes[writes.len() - 3..],
            &[
                format!("DROP TRIGGER IF EXISTS `{}`", second.trigger(TriggerAction::Insert)),
                format!("DROP TRIGGER IF EXISTS `{}`", second.trigger(TriggerAction::Update)),
                format!("DROP TRIGGER IF EXISTS `{}`", second.trigger(TriggerAction::Delete)),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_drops_every_installed_trigger() {
        let db = RecordingExecutor::new().respond_for(
            "information_schema.TRIGGERS",
            "users",
            vec![
                Value::from("users_delete_2011_10_09_08_07_56_000"),
                Value::from("users_insert_2011_10_09_09_07_56_000"),
            ],
        );

        cleanup(&db, "users").await.unwrap();

        assert_eq!(
            db.writes(),
            vec![
                "DROP TRIGGER IF EXISTS `users_delete_2011_10_09_08_07_56_000`",
                "DROP TRIGGER IF EXISTS `users_insert_2011_10_09_09_07_56_000`",
            ]
        );
        assert_eq!(
            db.calls()[0].params,
            vec![Value::from("users"), Value::from("%hadron_action%")]
        );
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let db = RecordingExecutor::new();

        cleanup(&db, "triggerme").await.unwrap();
        cleanup(&db, "triggerme").await.unwrap();

        assert!(db.writes().is_empty());
        assert_eq!(db.calls().len(), 2);
    }
}
