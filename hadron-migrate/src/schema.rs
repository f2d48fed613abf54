//! Schema cloning: building the ghost table from the source definition.

use std::fmt;
use std::sync::LazyLock;

use hadron_mysql::Value;
use regex_lite::Regex;
use tracing::{debug, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::executor::{SqlExecutor, value_as_i64, value_as_string};
use crate::naming::quote_identifier;

/// Auto-increment headroom reserved between reading the source's highest key
/// and creating the clone.
pub const SAFETY_MARGIN: u64 = 3;

static AUTO_INCREMENT_OPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AUTO_INCREMENT=\d+").expect("valid regex"));

/// A table's name together with its `SHOW CREATE TABLE` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Full `CREATE TABLE` statement.
    pub create_sql: String,
}

impl TableDefinition {
    /// Create a definition from known parts.
    pub fn new(name: impl Into<String>, create_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_sql: create_sql.into(),
        }
    }

    /// Read the current definition of `table`.
    pub async fn fetch(db: &dyn SqlExecutor, table: &str) -> MigrateResult<Self> {
        let sql = format!("SHOW CREATE TABLE {}", quote_identifier(table));
        let row = db
            .select_one(&sql, Vec::new())
            .await?
            .ok_or_else(|| MigrationError::schema(format!("table `{}` not found", table)))?;

        let create_sql = row
            .get("Create Table")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                MigrationError::schema(format!("no CREATE TABLE text returned for `{}`", table))
            })?;

        Ok(Self::new(table, create_sql))
    }
}

/// Produce the `CREATE TABLE` statement for a copy of `source` named `dest`.
///
/// Table references (the `CREATE TABLE` header and self-referencing
/// `REFERENCES` clauses) move to the destination name; columns and keys that
/// merely share the name are left alone. The auto-increment seed is set to
/// `offset + SAFETY_MARGIN`.
pub fn schema_sql(source: &TableDefinition, dest: &str, offset: u64) -> String {
    let seed = format!("AUTO_INCREMENT={}", offset + SAFETY_MARGIN);
    let (from, to) = (quote_identifier(&source.name), quote_identifier(dest));
    let header = format!("CREATE TABLE {}", from);
    let renamed = match source.create_sql.strip_prefix(&header) {
        Some(body) => format!("CREATE TABLE {}{}", to, body),
        None => source.create_sql.replacen(&from, &to, 1),
    }
    .replace(&format!("REFERENCES {} ", from), &format!("REFERENCES {} ", to));

    if AUTO_INCREMENT_OPTION.is_match(&renamed) {
        return AUTO_INCREMENT_OPTION
            .replace_all(&renamed, seed.as_str())
            .into_owned();
    }

    // Empty tables report no seed; table options follow the closing paren.
    match renamed.rfind("\n)") {
        Some(idx) => {
            let (head, tail) = renamed.split_at(idx + 2);
            format!("{} {}{}", head, seed, tail)
        }
        None => format!("{} {}", renamed, seed),
    }
}

/// One modification applied to the ghost table before backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    /// Add a column with a full MySQL column definition.
    AddColumn {
        /// Column name.
        name: String,
        /// Type and attributes, e.g. `TINYINT(1) NOT NULL DEFAULT 0`.
        definition: String,
    },
    /// Change a column's type or attributes, keeping its name.
    ModifyColumn {
        /// Column name.
        name: String,
        /// New type and attributes.
        definition: String,
    },
    /// Remove a column.
    DropColumn {
        /// Column name.
        name: String,
    },
    /// Add an index.
    AddIndex {
        /// Index name.
        name: String,
        /// Indexed columns, in order.
        columns: Vec<String>,
        /// Whether the index is unique.
        unique: bool,
    },
    /// Remove an index.
    DropIndex {
        /// Index name.
        name: String,
    },
}

impl SchemaChange {
    /// Add a column.
    pub fn add_column(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self::AddColumn {
            name: name.into(),
            definition: definition.into(),
        }
    }

    /// Modify a column.
    pub fn modify_column(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self::ModifyColumn {
            name: name.into(),
            definition: definition.into(),
        }
    }

    /// Drop a column.
    pub fn drop_column(name: impl Into<String>) -> Self {
        Self::DropColumn { name: name.into() }
    }

    /// Add a non-unique index.
    pub fn add_index(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::AddIndex {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    /// Add a unique index.
    pub fn add_unique_index(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::AddIndex {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
        }
    }

    /// Drop an index.
    pub fn drop_index(name: impl Into<String>) -> Self {
        Self::DropIndex { name: name.into() }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddColumn { name, definition } => {
                write!(f, "ADD COLUMN {} {}", quote_identifier(name), definition)
            }
            Self::ModifyColumn { name, definition } => {
                write!(f, "MODIFY COLUMN {} {}", quote_identifier(name), definition)
            }
            Self::DropColumn { name } => write!(f, "DROP COLUMN {}", quote_identifier(name)),
            Self::AddIndex {
                name,
                columns,
                unique,
            } => {
                let cols = columns
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let kind = if *unique { "UNIQUE INDEX" } else { "INDEX" };
                write!(f, "ADD {} {} ({})", kind, quote_identifier(name), cols)
            }
            Self::DropIndex { name } => write!(f, "DROP INDEX {}", quote_identifier(name)),
        }
    }
}

/// Build the `ALTER TABLE` statement applying `changes` to `table`.
pub fn alter_sql(table: &str, changes: &[SchemaChange]) -> Option<String> {
    if changes.is_empty() {
        return None;
    }
    let specs = changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("ALTER TABLE {} {}", quote_identifier(table), specs))
}

/// Create `ghost` as a copy of `source` with `modifications` applied.
///
/// The ghost's auto-increment seed starts past the source's current highest
/// key. If the modifications fail to apply, the half-built ghost is dropped
/// before the error is returned.
pub async fn clone_table(
    db: &dyn SqlExecutor,
    source: &str,
    ghost: &str,
    modifications: &[SchemaChange],
    primary_key: &str,
) -> MigrateResult<()> {
    let definition = TableDefinition::fetch(db, source).await?;
    let offset = max_primary_key(db, source, primary_key)
        .await?
        .map_or(0, |max| max.max(0) as u64);

    db.execute(&schema_sql(&definition, ghost, offset), Vec::new())
        .await?;
    debug!(source = %source, ghost = %ghost, offset, "Ghost table created");

    if let Some(alter) = alter_sql(ghost, modifications) {
        if let Err(e) = db.execute(&alter, Vec::new()).await {
            if let Err(drop_err) = drop_table(db, ghost).await {
                warn!(ghost = %ghost, error = %drop_err, "Could not drop partially built ghost table");
            }
            return Err(e);
        }
    }

    info!(
        source = %source,
        ghost = %ghost,
        modifications = modifications.len(),
        "Cloned table"
    );
    Ok(())
}

/// Highest primary key currently in `table`, or `None` when it is empty.
pub async fn max_primary_key(
    db: &dyn SqlExecutor,
    table: &str,
    primary_key: &str,
) -> MigrateResult<Option<i64>> {
    let sql = format!(
        "SELECT MAX({}) FROM {}",
        quote_identifier(primary_key),
        quote_identifier(table)
    );
    value_as_i64(db.select_value(&sql, Vec::new()).await?)
}

/// Column names of `table` in ordinal order.
pub async fn table_columns(db: &dyn SqlExecutor, table: &str) -> MigrateResult<Vec<String>> {
    let columns = db
        .select_values(
            "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            vec![Value::from(table)],
        )
        .await?
        .into_iter()
        .map(value_as_string)
        .collect::<MigrateResult<Vec<_>>>()?;

    if columns.is_empty() {
        return Err(MigrationError::schema(format!(
            "table `{}` has no columns or does not exist",
            table
        )));
    }
    Ok(columns)
}

/// Primary key columns of `table` in key order; empty when it has none.
pub async fn primary_key_columns(db: &dyn SqlExecutor, table: &str) -> MigrateResult<Vec<String>> {
    db.select_values(
        "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
         ORDER BY ORDINAL_POSITION",
        vec![Value::from(table)],
    )
    .await?
    .into_iter()
    .map(value_as_string)
    .collect()
}

/// Whether `table` exists in the current database.
pub async fn table_exists(db: &dyn SqlExecutor, table: &str) -> MigrateResult<bool> {
    let count = db
        .select_value(
            "SELECT COUNT(*) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
            vec![Value::from(table)],
        )
        .await?;
    Ok(value_as_i64(count)?.unwrap_or(0) > 0)
}

/// Drop `table` if it exists.
pub async fn drop_table(db: &dyn SqlExecutor, table: &str) -> MigrateResult<()> {
    db.execute(
        &format!("DROP TABLE IF EXISTS {}", quote_identifier(table)),
        Vec::new(),
    )
    .await?;
    Ok(())
}
