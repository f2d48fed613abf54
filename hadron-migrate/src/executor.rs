//! The SQL execution seam between the engine and the database.

use async_trait::async_trait;
use hadron_mysql::{MysqlConnection, MysqlPool, Value};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::error::{MigrateResult, MigrationError};

/// Synchronous-looking SQL interface consumed by every engine operation.
///
/// Implementations must run all calls on one database session: the
/// cutover relies on `LOCK TABLES` staying in effect across calls.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> MigrateResult<u64>;

    /// Fetch the first row as a JSON object keyed by column name.
    async fn select_one(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Option<JsonValue>>;

    /// Fetch the first column of the first row.
    async fn select_value(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Option<Value>>;

    /// Fetch the first column of every row.
    async fn select_values(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Vec<Value>>;
}

/// A single MySQL session used as the migration's executor.
pub struct MysqlSession {
    conn: Mutex<MysqlConnection>,
}

impl MysqlSession {
    /// Wrap an existing connection.
    pub fn new(conn: MysqlConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Check a connection out of the pool for the lifetime of the session.
    pub async fn open(pool: &MysqlPool) -> MigrateResult<Self> {
        Ok(Self::new(pool.get().await?))
    }

    /// Return the underlying connection.
    pub fn into_inner(self) -> MysqlConnection {
        self.conn.into_inner()
    }
}

#[async_trait]
impl SqlExecutor for MysqlSession {
    async fn execute(&self, sql: &str, params: Vec<Value>) -> MigrateResult<u64> {
        let mut conn = self.conn.lock().await;
        Ok(conn.execute_params(sql, params).await?)
    }

    async fn select_one(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Option<JsonValue>> {
        let mut conn = self.conn.lock().await;
        Ok(conn.query_json(sql, params).await?)
    }

    async fn select_value(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Option<Value>> {
        let mut conn = self.conn.lock().await;
        Ok(conn.query_scalar(sql, params).await?)
    }

    async fn select_values(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Vec<Value>> {
        let mut conn = self.conn.lock().await;
        Ok(conn.query_column(sql, params).await?)
    }
}

/// Interpret a scalar as a nullable integer.
///
/// Text-protocol results arrive as bytes, so this parses as well as converts.
pub fn value_as_i64(value: Option<Value>) -> MigrateResult<Option<i64>> {
    match value {
        None => Ok(None),
        Some(v) => mysql_async::from_value_opt::<Option<i64>>(v)
            .map_err(|e| MigrationError::schema(format!("expected an integer, got {:?}", e.0))),
    }
}

/// Interpret a scalar as a string.
pub fn value_as_string(value: Value) -> MigrateResult<String> {
    mysql_async::from_value_opt::<String>(value)
        .map_err(|e| MigrationError::schema(format!("expected a string, got {:?}", e.0)))
}
