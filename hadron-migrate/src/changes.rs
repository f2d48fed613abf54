//! The append-only changes table written by triggers.

use hadron_mysql::Value;
use tracing::{info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, value_as_string};
use crate::naming::quote_identifier;
use crate::schema::{TableDefinition, drop_table, max_primary_key, schema_sql};

/// Enumerated action tag on every change record.
pub const ACTION_COLUMN: &str = "hadron_action";

/// Surrogate key recording arrival order.
pub const CHANGE_ID_COLUMN: &str = "hadron_change_id";

/// Non-unique index over [`ACTION_COLUMN`].
pub const ACTION_INDEX: &str = "index_hadron_action";

/// Prefix shared by bookkeeping columns that never reach the ghost table.
pub const BOOKKEEPING_PREFIX: &str = "hadron_";

/// Build the `ALTER TABLE` turning a fresh source clone into a change log.
///
/// The source's primary and unique keys are removed so that repeated writes
/// to one row land as separate records, ordered by the new surrogate key.
pub fn changes_alter_sql(
    changes_table: &str,
    primary_key: &str,
    primary_key_type: &str,
    unique_indexes: &[String],
) -> String {
    let mut specs = vec![
        format!(
            "MODIFY COLUMN {} {} NOT NULL",
            quote_identifier(primary_key),
            primary_key_type
        ),
        "DROP PRIMARY KEY".to_string(),
    ];
    specs.extend(
        unique_indexes
            .iter()
            .filter(|name| name.as_str() != "PRIMARY")
            .map(|name| format!("DROP INDEX {}", quote_identifier(name))),
    );
    specs.push(format!(
        "ADD COLUMN {} BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY FIRST",
        quote_identifier(CHANGE_ID_COLUMN)
    ));
    specs.push(format!(
        "ADD COLUMN {} ENUM('insert', 'update', 'delete') NOT NULL",
        quote_identifier(ACTION_COLUMN)
    ));
    specs.push(format!(
        "ADD INDEX {} ({})",
        quote_identifier(ACTION_INDEX),
        quote_identifier(ACTION_COLUMN)
    ));

    format!(
        "ALTER TABLE {} {}",
        quote_identifier(changes_table),
        specs.join(", ")
    )
}

/// Create `changes_table` with the source's columns plus the action tag.
///
/// Either the table is fully built or it does not exist afterwards.
pub async fn clone_table_for_changes(
    db: &dyn SqlExecutor,
    source: &str,
    changes_table: &str,
    primary_key: &str,
) -> MigrateResult<()> {
    let definition = TableDefinition::fetch(db, source).await?;
    let primary_key_type = column_type(db, source, primary_key).await?;
    let unique_indexes = unique_indexes(db, source).await?;
    let offset = max_primary_key(db, source, primary_key)
        .await?
        .map_or(0, |max| max.max(0) as u64);

    db.execute(&schema_sql(&definition, changes_table, offset), Vec::new())
        .await?;

    let alter = changes_alter_sql(changes_table, primary_key, &primary_key_type, &unique_indexes);
    if let Err(e) = db.execute(&alter, Vec::new()).await {
        if let Err(drop_err) = drop_table(db, changes_table).await {
            warn!(changes = %changes_table, error = %drop_err, "Could not drop partially built changes table");
        }
        return Err(e);
    }

    info!(source = %source, changes = %changes_table, "Changes table created");
    Ok(())
}

async fn column_type(db: &dyn SqlExecutor, table: &str, column: &str) -> MigrateResult<String> {
    let value = db
        .select_value(
            "SELECT COLUMN_TYPE FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
            vec![Value::from(table), Value::from(column)],
        )
        .await?
        .ok_or_else(|| {
            MigrationError::schema(format!("column `{}`.`{}` not found", table, column))
        })?;
    value_as_string(value)
}

async fn unique_indexes(db: &dyn SqlExecutor, table: &str) -> MigrateResult<Vec<String>> {
    db.select_values(
        "SELECT DISTINCT INDEX_NAME FROM information_schema.STATISTICS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND NON_UNIQUE = 0",
        vec![Value::from(table)],
    )
    .await?
    .into_iter()
    .map(value_as_string)
    .collect()
}
