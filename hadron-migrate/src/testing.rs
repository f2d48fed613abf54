//! In-memory executor for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use hadron_mysql::{MysqlError, Value};
use serde_json::Value as JsonValue;

use crate::error::MigrateResult;
use crate::executor::SqlExecutor;

/// One call observed by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub sql: String,
    pub params: Vec<Value>,
}

struct Rule {
    fragment: String,
    first_param: Option<Value>,
    rows: Vec<Value>,
    row: Option<JsonValue>,
}

impl Rule {
    fn matches(&self, sql: &str, params: &[Value]) -> bool {
        sql.contains(&self.fragment)
            && self
                .first_param
                .as_ref()
                .is_none_or(|p| params.first() == Some(p))
    }
}

/// Records every statement and answers selects from scripted rules.
///
/// Rules match on a SQL fragment and optionally the first bound parameter;
/// the first matching rule wins. Unmatched selects return nothing.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    calls: Mutex<Vec<Call>>,
    rules: Mutex<Vec<Rule>>,
    failures: Mutex<VecDeque<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer selects containing `fragment` with `rows`.
    pub fn respond(self, fragment: &str, rows: Vec<Value>) -> Self {
        self.push_rule(fragment, None, rows, None)
    }

    /// Like [`respond`](Self::respond), but only when the first parameter matches.
    pub fn respond_for(self, fragment: &str, param: &str, rows: Vec<Value>) -> Self {
        self.push_rule(fragment, Some(Value::from(param)), rows, None)
    }

    /// Answer `select_one` calls containing `fragment` with `row`.
    pub fn respond_row(self, fragment: &str, row: JsonValue) -> Self {
        self.push_rule(fragment, None, Vec::new(), Some(row))
    }

    /// Answer column lookups for `table`.
    pub fn with_columns(self, table: &str, columns: &[&str]) -> Self {
        let rows = columns.iter().map(|c| Value::from(*c)).collect();
        self.respond_for("information_schema.COLUMNS", table, rows)
    }

    /// Fail the next statement containing `fragment`, once per call to this method.
    pub fn fail_once(self, fragment: &str) -> Self {
        self.failures.lock().unwrap().push_back(fragment.to_string());
        self
    }

    fn push_rule(
        self,
        fragment: &str,
        first_param: Option<Value>,
        rows: Vec<Value>,
        row: Option<JsonValue>,
    ) -> Self {
        self.rules.lock().unwrap().push(Rule {
            fragment: fragment.to_string(),
            first_param,
            rows,
            row,
        });
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.sql).collect()
    }

    /// Statements that are not reads.
    pub fn writes(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| {
                let head = s.trim_start().to_ascii_uppercase();
                !(head.starts_with("SELECT") || head.starts_with("SHOW"))
            })
            .collect()
    }

    fn record(&self, sql: &str, params: &[Value]) -> MigrateResult<()> {
        self.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|f| sql.contains(f.as_str())) {
            failures.remove(pos);
            return Err(MysqlError::connection(format!("injected failure: {}", sql)).into());
        }
        Ok(())
    }

    fn lookup(&self, sql: &str, params: &[Value]) -> (Vec<Value>, Option<JsonValue>) {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.matches(sql, params))
            .map(|r| (r.rows.clone(), r.row.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str, params: Vec<Value>) -> MigrateResult<u64> {
        self.record(sql, &params)?;
        Ok(0)
    }

    async fn select_one(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Option<JsonValue>> {
        self.record(sql, &params)?;
        Ok(self.lookup(sql, &params).1)
    }

    async fn select_value(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Option<Value>> {
        self.record(sql, &params)?;
        Ok(self.lookup(sql, &params).0.into_iter().next())
    }

    async fn select_values(&self, sql: &str, params: Vec<Value>) -> MigrateResult<Vec<Value>> {
        self.record(sql, &params)?;
        Ok(self.lookup(sql, &params).0)
    }
}
