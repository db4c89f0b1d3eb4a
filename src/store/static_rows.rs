//! Static row store.
//!
//! Serves rows from a fixed function instead of a database. Used for synthetic
//! data in configuration (`type: static`) and as a test double.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::extract::RawRow;
use crate::store::{Store, StoreError};

type RowSource = Box<dyn Fn(&str) -> Result<Vec<RawRow>, StoreError> + Send + Sync>;

/// Store backed by a row-producing function.
pub struct StaticStore {
    source: RowSource,
    closed: AtomicBool,
}

impl StaticStore {
    /// Create a store that answers every query with `source(query)`.
    pub fn new<F>(source: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<RawRow>, StoreError> + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a store that returns the same rows for every query.
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        Self::new(move |_| Ok(rows.clone()))
    }

    /// Create a store from comma-separated row text. See [`parse_rows`].
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        parse_rows(text).map(Self::from_rows)
    }

    /// Whether [`Store::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StaticStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticStore")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for StaticStore {
    async fn query(&self, text: &str) -> Result<Vec<RawRow>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        (self.source)(text)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Parse comma-separated row text.
///
/// One row per line. Lines are trimmed and blank lines skipped; fields are
/// split on `,` and kept verbatim. Every row must have as many fields as the
/// first one.
///
/// ```
/// use rowgauge::store::parse_rows;
///
/// let rows = parse_rows("1,foo\n\n  2,bar  \n").unwrap();
/// assert_eq!(rows, vec![vec!["1", "foo"], vec!["2", "bar"]]);
/// ```
pub fn parse_rows(text: &str) -> Result<Vec<RawRow>, StoreError> {
    let mut rows = Vec::new();
    let mut width = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: RawRow = line.split(',').map(str::to_string).collect();
        match width {
            None => width = Some(fields.len()),
            Some(w) if w != fields.len() => {
                return Err(StoreError::InvalidRows(format!(
                    "'{}' has {} fields, the first line has {}",
                    line,
                    fields.len(),
                    w
                )));
            }
            Some(_) => {}
        }
        rows.push(fields);
    }

    Ok(rows)
}
