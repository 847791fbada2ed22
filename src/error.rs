//! Error taxonomy shared by the analytic core, and the per-item batch types
//! used to report partial results without aborting a batch.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or out-of-range caller input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Unexpected numeric failure for one item (e.g. a zero baseline).
    #[error("computation failed: {0}")]
    Computation(String),

    /// The Metric Store could not be reached or returned garbage.
    #[error("metric store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.into())
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(e: r2d2::Error) -> Self {
        Self::Store(e.into())
    }
}

/// Why a correlation coefficient could not be produced for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NullReason {
    InsufficientData,
    ZeroVariance,
}

/// An item a batch could not process, with the reason it was left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub id: String,
    pub reason: String,
}

impl Skipped {
    pub fn new(id: impl Into<String>, err: &CoreError) -> Self {
        Self {
            id: id.into(),
            reason: err.to_string(),
        }
    }
}

/// Outcome of a batch where individual items may fail independently.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub items: Vec<T>,
    pub skipped: Vec<Skipped>,
    /// True when at least one item was skipped or only partially computed.
    pub partial: bool,
    /// True when the deadline stopped the batch before every item was visited.
    pub truncated: bool,
}

impl<T> BatchResult<T> {
    pub fn new(items: Vec<T>, skipped: Vec<Skipped>, any_item_partial: bool) -> Self {
        let partial = any_item_partial || !skipped.is_empty();
        Self {
            items,
            skipped,
            partial,
            truncated: false,
        }
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self.partial |= truncated;
        self
    }
}
