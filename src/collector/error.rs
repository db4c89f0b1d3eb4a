//! Collector error types.

use thiserror::Error;

use crate::collector::SchedulerState;
use crate::extract::ValueParseError;
use crate::store::StoreError;

/// Errors that can occur during collection or scheduler lifecycle changes.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The store query failed. The tick is skipped.
    #[error("query failed: {0}")]
    Query(#[from] StoreError),

    /// A row had a non-numeric value. The whole batch is discarded.
    #[error("value parse failed: {0}")]
    Parse(#[from] ValueParseError),

    /// Start or stop called out of order. No state change occurred.
    #[error("scheduler is {actual}, expected {expected}")]
    Lifecycle {
        expected: SchedulerState,
        actual: SchedulerState,
    },

    /// A sink could not be registered with the metrics registry.
    #[error("failed to register sink '{sink}': {source}")]
    Register {
        sink: String,
        #[source]
        source: prometheus::Error,
    },
}
