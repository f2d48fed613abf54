//! Helpers shared by the live MySQL integration tests.
//!
//! Every test returns early unless `HADRON_TEST_DATABASE_URL` points at a
//! scratch database, e.g. `mysql://root@127.0.0.1:3306/hadron_test`.

#![allow(dead_code)]

use hadron::migrate::executor::{value_as_i64, value_as_string};
use hadron::migrate::{MysqlSession, table_exists};
use hadron::mysql::{MysqlConfig, MysqlPool, Value};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

/// Environment variable naming the scratch database.
pub const TEST_DATABASE_URL_ENV: &str = "HADRON_TEST_DATABASE_URL";

/// Install a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hadron_migrate=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Connect to the scratch database, or `None` when it is not configured.
pub async fn pool() -> Option<MysqlPool> {
    init_tracing();
    let Ok(config) = MysqlConfig::from_env_var(TEST_DATABASE_URL_ENV) else {
        eprintln!("{} is not set, skipping live MySQL test", TEST_DATABASE_URL_ENV);
        return None;
    };
    Some(MysqlPool::new(config).await.expect("failed to connect to test database"))
}

/// Open a dedicated session for engine calls.
pub async fn session(pool: &MysqlPool) -> MysqlSession {
    MysqlSession::open(pool).await.expect("failed to open session")
}

/// Execute a statement on a fresh pooled connection.
pub async fn sql(pool: &MysqlPool, statement: &str) {
    pool.get()
        .await
        .expect("failed to get connection")
        .execute(statement)
        .await
        .unwrap_or_else(|e| panic!("{statement} failed: {e}"));
}

/// Drop and create `table` with an auto-increment `id` primary key.
pub async fn recreate(pool: &MysqlPool, table: &str, columns: &[&str]) {
    sql(pool, &format!("DROP TABLE IF EXISTS `{table}`")).await;
    let mut definition = vec!["`id` int(11) NOT NULL AUTO_INCREMENT".to_string()];
    definition.extend(columns.iter().map(|c| c.to_string()));
    definition.push("PRIMARY KEY (`id`)".to_string());
    sql(
        pool,
        &format!(
            "CREATE TABLE `{table}` ({}) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            definition.join(", ")
        ),
    )
    .await;
}

/// Standard columns used by most fixtures.
pub const TEXT_NUMBER_COLUMNS: &[&str] = &[
    "`text` varchar(255) DEFAULT NULL",
    "`number` int(11) DEFAULT NULL",
    "`created_at` datetime DEFAULT NULL",
    "`updated_at` datetime DEFAULT NULL",
];

/// First column of the first row as an integer.
pub async fn select_i64(pool: &MysqlPool, query: &str) -> i64 {
    let value = pool
        .get()
        .await
        .expect("failed to get connection")
        .query_scalar(query, Vec::new())
        .await
        .unwrap_or_else(|e| panic!("{query} failed: {e}"));
    value_as_i64(value).unwrap().unwrap_or(0)
}

/// First column of the first row as a string, if any row matched.
pub async fn select_string(pool: &MysqlPool, query: &str) -> Option<String> {
    pool.get()
        .await
        .expect("failed to get connection")
        .query_scalar(query, Vec::new())
        .await
        .unwrap_or_else(|e| panic!("{query} failed: {e}"))
        .filter(|v| *v != Value::NULL)
        .map(|v| value_as_string(v).unwrap())
}

/// First row as a JSON object.
pub async fn select_one(pool: &MysqlPool, query: &str) -> Option<JsonValue> {
    pool.get()
        .await
        .expect("failed to get connection")
        .query_json(query, Vec::new())
        .await
        .unwrap_or_else(|e| panic!("{query} failed: {e}"))
}

/// `DATA_TYPE` of a column, e.g. `varchar` or `tinyint`.
pub async fn column_type(pool: &MysqlPool, table: &str, column: &str) -> Option<String> {
    select_string(
        pool,
        &format!(
            "SELECT DATA_TYPE FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = '{table}' AND COLUMN_NAME = '{column}'"
        ),
    )
    .await
}

/// Assert a column exists with the given `DATA_TYPE`.
pub async fn assert_column(pool: &MysqlPool, table: &str, column: &str, data_type: &str) {
    assert_eq!(
        column_type(pool, table, column).await.as_deref(),
        Some(data_type),
        "column `{table}`.`{column}`"
    );
}

/// Whether a table currently exists.
pub async fn exists(pool: &MysqlPool, table: &str) -> bool {
    let session = session(pool).await;
    table_exists(&session, table).await.unwrap()
}
