//! MySQL connection wrapper.

use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Row, Value};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{MysqlError, MysqlResult};
use crate::row::FromMysqlRow;

/// A wrapper around a single MySQL session.
///
/// Every method takes positional parameters. An empty parameter list sends
/// the statement over the text protocol, anything else prepares it.
pub struct MysqlConnection {
    conn: Conn,
}

impl MysqlConnection {
    /// Create a new connection wrapper.
    pub fn new(conn: Conn) -> Self {
        Self { conn }
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, query: &str) -> MysqlResult<u64> {
        self.execute_params(query, Vec::new()).await
    }

    /// Execute a statement with parameters and return the number of affected rows.
    pub async fn execute_params(&mut self, query: &str, params: Vec<Value>) -> MysqlResult<u64> {
        debug!(query = %query, params = params.len(), "Executing statement");
        if params.is_empty() {
            self.conn.query_drop(query).await?;
        } else {
            self.conn.exec_drop(query, Params::Positional(params)).await?;
        }
        Ok(self.conn.affected_rows())
    }

    /// Fetch all rows.
    pub async fn query_rows(&mut self, query: &str, params: Vec<Value>) -> MysqlResult<Vec<Row>> {
        debug!(query = %query, params = params.len(), "Executing query");
        let rows: Vec<Row> = if params.is_empty() {
            self.conn.query(query).await?
        } else {
            self.conn.exec(query, Params::Positional(params)).await?
        };
        Ok(rows)
    }

    /// Fetch the first row, if any.
    pub async fn query_first_row(
        &mut self,
        query: &str,
        params: Vec<Value>,
    ) -> MysqlResult<Option<Row>> {
        debug!(query = %query, params = params.len(), "Executing query_first_row");
        let row: Option<Row> = if params.is_empty() {
            self.conn.query_first(query).await?
        } else {
            self.conn.exec_first(query, Params::Positional(params)).await?
        };
        Ok(row)
    }

    /// Fetch the first row decoded as a JSON object keyed by column name.
    pub async fn query_json(
        &mut self,
        query: &str,
        params: Vec<Value>,
    ) -> MysqlResult<Option<JsonValue>> {
        match self.query_first_row(query, params).await? {
            Some(row) => <JsonValue as FromMysqlRow>::from_row(&row)
                .map(Some)
                .map_err(|e| MysqlError::deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Fetch the first column of the first row.
    ///
    /// Returns `None` when the query produced no rows; a SQL `NULL` comes
    /// back as `Some(Value::NULL)`.
    pub async fn query_scalar(
        &mut self,
        query: &str,
        params: Vec<Value>,
    ) -> MysqlResult<Option<Value>> {
        match self.query_first_row(query, params).await? {
            Some(row) => first_column(row).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch the first column of every row.
    pub async fn query_column(&mut self, query: &str, params: Vec<Value>) -> MysqlResult<Vec<Value>> {
        self.query_rows(query, params)
            .await?
            .into_iter()
            .map(first_column)
            .collect()
    }

    /// Get the inner connection mutably.
    pub fn inner_mut(&mut self) -> &mut Conn {
        &mut self.conn
    }

    /// Consume and return the inner connection.
    pub fn into_inner(self) -> Conn {
        self.conn
    }
}

fn first_column(mut row: Row) -> MysqlResult<Value> {
    row.take::<Value, usize>(0)
        .ok_or_else(|| MysqlError::query("expected at least one column"))
}
