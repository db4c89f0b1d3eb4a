//! Live SQL store.
//!
//! Runs each query on a pooled SQLite connection and renders every column as
//! a string, whatever its native type. Formatting numbers and timestamps is
//! left to the query author.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::extract::RawRow;
use crate::store::db::SqlitePool;
use crate::store::{Store, StoreError};

/// Store that executes queries against a SQLite pool.
#[derive(Debug)]
pub struct SqlStore {
    pool: SqlitePool,
    closed: AtomicBool,
}

impl SqlStore {
    /// Wrap an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a store from a connection URL without connecting.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        SqlitePool::connect_lazy(url, max_connections).map(Self::new)
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn query(&self, text: &str) -> Result<Vec<RawRow>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        // Released back to the pool when dropped, on every return path.
        let mut conn = self.pool.inner().acquire().await?;
        let rows = sqlx::query(text).fetch_all(&mut *conn).await?;

        let mut width = None;
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                check_width(&mut width, index, row.len())?;
                scan_row(row, index)
            })
            .collect()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        self.pool.close().await;
        tracing::debug!("SQL store pool closed");
        Ok(())
    }
}

/// Fix the column count on the first row and reject any row that differs.
fn check_width(width: &mut Option<usize>, row: usize, found: usize) -> Result<(), StoreError> {
    match *width {
        None => {
            *width = Some(found);
            Ok(())
        }
        Some(expected) if expected != found => Err(StoreError::ColumnMismatch {
            row,
            expected,
            found,
        }),
        Some(_) => Ok(()),
    }
}

fn scan_row(row: &SqliteRow, index: usize) -> Result<RawRow, StoreError> {
    (0..row.len())
        .map(|column| {
            row.try_get_unchecked::<Option<String>, _>(column)?
                .ok_or(StoreError::NullColumn { row: index, column })
        })
        .collect()
}
