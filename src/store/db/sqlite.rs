//! SQLite backend implementation using sqlx.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool as SqlxPool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::store::StoreError;

/// Default maximum connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default timeout for acquiring a connection.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite connection pool wrapper.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("size", &self.inner.size())
            .finish_non_exhaustive()
    }
}

impl SqlitePool {
    /// Create a pool without opening any connection.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g. `sqlite://data/app.db?mode=ro`
    /// * `max_connections` - upper bound on pooled connections
    ///
    /// Connections are opened on first acquire, so an unreachable database
    /// surfaces as a query error rather than a construction error. Must be
    /// called within a Tokio runtime.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        Ok(Self { inner: pool })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
