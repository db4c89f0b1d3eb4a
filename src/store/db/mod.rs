//! Database backends for the live-query store.
//!
//! Currently supports SQLite. Another backend would add a sibling module with
//! the same `connect_lazy` / `inner` / `close` surface.
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect_lazy("sqlite://data/app.db?mode=ro", 4)?;
//! let rows = sqlx::query("SELECT 1").fetch_all(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
