//! MySQL session layer for Large Hadron.
//!
//! This crate wraps the `mysql_async` driver with the small surface the
//! migration engine needs: a configurable connection pool, and connections
//! that can execute statements, fetch a single row, fetch a single scalar,
//! and fetch a single column.
//!
//! Statements without bound parameters go over the text protocol. DDL,
//! `CREATE TRIGGER` and `LOCK TABLES` cannot be prepared by MySQL, so the
//! engine relies on that split.
//!
//! # Example
//!
//! ```rust,ignore
//! use hadron_mysql::{MysqlConfig, MysqlPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MysqlConfig::from_url("mysql://root@localhost/app")?;
//!     let pool = MysqlPool::new(config).await?;
//!
//!     let mut conn = pool.get().await?;
//!     conn.execute("SELECT 1").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod row;

pub use config::MysqlConfig;
pub use connection::MysqlConnection;
pub use error::{MysqlError, MysqlResult};
pub use pool::{MysqlPool, MysqlPoolBuilder, PoolConfig};
pub use row::{FromMysqlRow, FromMysqlRowError, value_to_json};

pub use mysql_async::Value;
