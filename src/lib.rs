//! # Hadron
//!
//! Online schema migrations for MySQL.
//!
//! Hadron changes the schema of a live table without holding a lock for the
//! length of the copy. It builds a ghost table with the new schema, captures
//! concurrent writes with triggers, copies existing rows in small chunks,
//! replays the captured writes and swaps the tables with one atomic rename.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hadron::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = MysqlPool::new(MysqlConfig::from_env()?).await?;
//!     let session = MysqlSession::open(&pool).await?;
//!
//!     let report = Migration::new(
//!         &session,
//!         "users",
//!         vec![SchemaChange::add_index("index_users_on_email", &["email"])],
//!     )
//!     .run()
//!     .await?;
//!
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// MySQL connections, pools and configuration.
pub mod mysql {
    pub use hadron_mysql::*;
}

/// The migration engine and its building blocks.
pub mod migrate {
    pub use hadron_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Migration, MigrationConfig, MigrationError, MigrationReport, MysqlSession, SchemaChange,
        SqlExecutor,
    };
    pub use crate::mysql::{MysqlConfig, MysqlPool};
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, Migration, MigrationError};
