//! Store Layer
//!
//! A [`Store`] turns query text into raw rows of strings. Two implementations:
//!
//! - [`StaticStore`]: fixed rows produced by a function; synthetic and test data
//! - [`SqlStore`]: live queries against a pooled SQLite database
//!
//! Once closed, a store rejects every further query with [`StoreError::Closed`].

pub mod db;
mod error;
mod sql;
mod static_rows;

use async_trait::async_trait;

use crate::extract::RawRow;

pub use error::StoreError;
pub use sql::SqlStore;
pub use static_rows::{StaticStore, parse_rows};

/// A queryable source of tabular rows.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Run `text` and return every row, each column rendered as a string.
    async fn query(&self, text: &str) -> Result<Vec<RawRow>, StoreError>;

    /// Release the underlying resources. Later queries fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}
