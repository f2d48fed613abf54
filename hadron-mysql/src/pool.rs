//! Connection pool for MySQL.

use std::sync::Arc;

use mysql_async::{Opts, Pool, PoolConstraints, PoolOpts};
use tracing::{debug, info};

use crate::config::MysqlConfig;
use crate::connection::MysqlConnection;
use crate::error::{MysqlError, MysqlResult};

/// A connection pool for MySQL.
///
/// The migration engine holds one connection for its whole run; the pool
/// mostly exists so tests and callers can issue concurrent application
/// writes against the same server.
#[derive(Clone)]
pub struct MysqlPool {
    inner: Pool,
    config: Arc<MysqlConfig>,
}

impl MysqlPool {
    /// Create a new connection pool from configuration.
    pub async fn new(config: MysqlConfig) -> MysqlResult<Self> {
        Self::with_pool_config(config, PoolConfig::default()).await
    }

    /// Create a new connection pool with custom pool configuration.
    pub async fn with_pool_config(
        config: MysqlConfig,
        pool_config: PoolConfig,
    ) -> MysqlResult<Self> {
        let constraints =
            PoolConstraints::new(pool_config.min_connections, pool_config.max_connections)
                .ok_or_else(|| {
                    MysqlError::config(format!(
                        "min_connections ({}) exceeds max_connections ({})",
                        pool_config.min_connections, pool_config.max_connections
                    ))
                })?;

        let opts = config
            .to_opts_builder()
            .pool_opts(PoolOpts::new().with_constraints(constraints));

        let pool = Pool::new(Opts::from(opts));

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "MySQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
        })
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> MysqlResult<MysqlConnection> {
        debug!("Acquiring connection from pool");
        let conn = self.inner.get_conn().await?;
        Ok(MysqlConnection::new(conn))
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &MysqlConfig {
        &self.config
    }

    /// Check if the pool is healthy by attempting a round trip.
    pub async fn is_healthy(&self) -> bool {
        match self.get().await {
            Ok(mut conn) => conn.execute("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    /// Disconnect all connections and close the pool.
    pub async fn disconnect(self) -> MysqlResult<()> {
        self.inner.disconnect().await?;
        info!("MySQL connection pool closed");
        Ok(())
    }

    /// Create a builder for configuring the pool.
    pub fn builder() -> MysqlPoolBuilder {
        MysqlPoolBuilder::new()
    }
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: usize,
    /// Minimum number of connections to keep alive.
    pub min_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
        }
    }
}

/// Builder for creating a connection pool.
#[derive(Debug, Default)]
pub struct MysqlPoolBuilder {
    config: Option<MysqlConfig>,
    url: Option<String>,
    pool_config: PoolConfig,
}

impl MysqlPoolBuilder {
    /// Create a new pool builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: MysqlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.pool_config.max_connections = n;
        self
    }

    /// Set the minimum number of connections.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.pool_config.min_connections = n;
        self
    }

    /// Build the connection pool.
    pub async fn build(self) -> MysqlResult<MysqlPool> {
        let config = if let Some(config) = self.config {
            config
        } else if let Some(url) = self.url {
            MysqlConfig::from_url(url)?
        } else {
            return Err(MysqlError::config("no database URL or config provided"));
        };

        MysqlPool::with_pool_config(config, self.pool_config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }

    #[test]
    fn test_pool_builder() {
        let builder = MysqlPoolBuilder::new()
            .url("mysql://localhost/test")
            .max_connections(20);

        assert!(builder.url.is_some());
        assert_eq!(builder.pool_config.max_connections, 20);
    }

    #[tokio::test]
    async fn test_pool_builder_requires_target() {
        let result = MysqlPoolBuilder::new().build().await;
        assert!(matches!(result, Err(MysqlError::Config(_))));
    }

    #[tokio::test]
    async fn test_pool_rejects_inverted_constraints() {
        let result = MysqlPool::builder()
            .url("mysql://localhost/test")
            .min_connections(5)
            .max_connections(2)
            .build()
            .await;
        assert!(matches!(result, Err(MysqlError::Config(_))));
    }
}
