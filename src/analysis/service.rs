//! Store-backed correlation requests.

use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use crate::analysis::correlation::validate_matrix_ids;
use crate::analysis::{CorrelationAnalyzer, CorrelationMatrix, CorrelationReport, SectorReport};
use crate::error::CoreError;
use crate::model::{Deadline, TimeWindow};
use crate::storage::MetricStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    #[default]
    All,
    Sector,
    Matrix,
}

impl FromStr for CorrelationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(CorrelationKind::All),
            "sector" => Ok(CorrelationKind::Sector),
            "matrix" => Ok(CorrelationKind::Matrix),
            other => Err(CoreError::validation(format!(
                "unknown correlation type '{other}', expected all, sector or matrix"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationRequest {
    pub kind: CorrelationKind,
    pub category: Option<String>,
    pub window: TimeWindow,
    pub product_ids: Vec<String>,
}

/// One of the three report shapes, tagged with `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelationOutput {
    All(CorrelationReport),
    Sector(SectorReport),
    Matrix {
        matrix: CorrelationMatrix,
        window_days: u32,
        truncated: bool,
    },
}

impl CorrelationOutput {
    pub fn truncated(&self) -> bool {
        match self {
            CorrelationOutput::All(r) => r.truncated,
            CorrelationOutput::Sector(r) => r.truncated,
            CorrelationOutput::Matrix { truncated, .. } => *truncated,
        }
    }
}

/// Window end: the newest price observation, or today on an empty store.
fn window_end(store: &dyn MetricStore) -> Result<NaiveDate, CoreError> {
    Ok(store
        .latest_observation_date()?
        .unwrap_or_else(|| Utc::now().date_naive()))
}

pub fn run(
    store: &dyn MetricStore,
    analyzer: &CorrelationAnalyzer,
    request: &CorrelationRequest,
    deadline: Deadline,
) -> Result<CorrelationOutput, CoreError> {
    let window = request.window;
    let end = window_end(store)?;
    let range = window.ending(end);
    debug!(kind = ?request.kind, %window, %end, "correlation request");

    match request.kind {
        CorrelationKind::All => {
            let series = store.price_series(request.category.as_deref(), range)?;
            Ok(CorrelationOutput::All(analyzer.analyze(&series, window, end, deadline)))
        }
        CorrelationKind::Sector => {
            let series = store.price_series(request.category.as_deref(), range)?;
            Ok(CorrelationOutput::Sector(
                analyzer.sector_correlations(&series, window, end, deadline),
            ))
        }
        CorrelationKind::Matrix => {
            validate_matrix_ids(&request.product_ids)?;
            let series = store.series_by_ids(&request.product_ids, range)?;
            let matrix = analyzer.matrix(&request.product_ids, &series, window, end, deadline)?;
            Ok(CorrelationOutput::Matrix {
                window_days: matrix.window_days,
                truncated: matrix.truncated,
                matrix,
            })
        }
    }
}

/// Split a comma-separated id list, dropping empty entries.
pub fn parse_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
