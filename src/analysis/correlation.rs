use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::stats;
use crate::error::{CoreError, NullReason};
use crate::model::{DateRange, Deadline, Metric, Series, SeriesData, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl Strength {
    pub fn from_coefficient(r: f64) -> Self {
        let r = r.abs();
        if r < 0.3 {
            Strength::Weak
        } else if r < 0.6 {
            Strength::Moderate
        } else if r <= 0.8 {
            Strength::Strong
        } else {
            Strength::VeryStrong
        }
    }
}

/// Pairwise relationship between two series. `series_a < series_b`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub series_a: String,
    pub series_b: String,
    pub coefficient: Option<f64>,
    /// Number of date-aligned observations.
    pub n: usize,
    pub strength: Option<Strength>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NullReason>,
    pub window_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub correlations: Vec<CorrelationResult>,
    pub window_days: u32,
    pub range: DateRange,
    /// Some pairs are null or were not computed.
    pub partial: bool,
    /// The deadline cut the run short; uncomputed pairs are omitted.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectorSummary {
    pub sector: String,
    pub constituents: Vec<String>,
    pub points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectorReport {
    pub sectors: Vec<SectorSummary>,
    pub correlations: Vec<CorrelationResult>,
    pub window_days: u32,
    pub range: DateRange,
    pub partial: bool,
    pub truncated: bool,
}

/// Symmetric NxN table over the requested ids, in request order.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    pub ids: Vec<String>,
    pub cells: Vec<Vec<Option<f64>>>,
    /// One entry per computed unordered pair, explaining null cells.
    pub pairs: Vec<CorrelationResult>,
    pub window_days: u32,
    pub range: DateRange,
    pub partial: bool,
    pub truncated: bool,
}

/// Correlate two already-windowed series.
pub fn correlate(a: &SeriesData, b: &SeriesData, window: TimeWindow) -> CorrelationResult {
    let (first, second) = if a.id() <= b.id() { (a, b) } else { (b, a) };
    let (xs, ys) = stats::align(&first.points, &second.points);
    let (coefficient, reason) = match stats::pearson(&xs, &ys) {
        Ok(r) => (Some(r), None),
        Err(reason) => (None, Some(reason)),
    };
    CorrelationResult {
        series_a: first.id().to_string(),
        series_b: second.id().to_string(),
        coefficient,
        n: xs.len(),
        strength: coefficient.map(Strength::from_coefficient),
        reason,
        window_days: window.days(),
    }
}

/// Strongest first, nulls last, ties by series ids.
pub fn rank(results: &mut [CorrelationResult]) {
    results.sort_by(|a, b| {
        match (a.coefficient, b.coefficient) {
            (Some(x), Some(y)) => y.abs().total_cmp(&x.abs()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.series_a.cmp(&b.series_a))
        .then_with(|| a.series_b.cmp(&b.series_b))
    });
}

fn restrict(series: &[SeriesData], range: DateRange) -> Vec<SeriesData> {
    series
        .iter()
        .map(|s| SeriesData {
            series: s.series.clone(),
            points: s.points.iter().copied().filter(|(d, _)| range.contains(*d)).collect(),
        })
        .collect()
}

/// One composite per sector: the simple mean, per date, of the constituent
/// prices observed on that date. Series without a sector are left out.
pub fn sector_composites(series: &[SeriesData]) -> Vec<(SectorSummary, SeriesData)> {
    let mut by_sector: BTreeMap<&str, Vec<&SeriesData>> = BTreeMap::new();
    for s in series.iter().filter(|s| s.series.metric == Metric::Price) {
        if let Some(sector) = s.series.sector.as_deref() {
            by_sector.entry(sector).or_default().push(s);
        }
    }

    by_sector
        .into_iter()
        .map(|(sector, members)| {
            let mut per_date: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
            for m in &members {
                for &(date, value) in &m.points {
                    let slot = per_date.entry(date).or_insert((0.0, 0));
                    slot.0 += value;
                    slot.1 += 1;
                }
            }
            let points: Vec<(NaiveDate, f64)> = per_date
                .into_iter()
                .map(|(date, (sum, count))| (date, sum / count as f64))
                .collect();

            let mut constituents: Vec<String> = members.iter().map(|m| m.id().to_string()).collect();
            constituents.sort();

            let summary = SectorSummary {
                sector: sector.to_string(),
                constituents,
                points: points.len(),
            };
            let composite = SeriesData {
                series: Series {
                    id: sector.to_string(),
                    name: Some(sector.to_string()),
                    metric: Metric::Price,
                    category: None,
                    sector: Some(sector.to_string()),
                },
                points,
            };
            (summary, composite)
        })
        .collect()
}

/// Matrix ids must name at least two distinct series.
pub fn validate_matrix_ids(ids: &[String]) -> Result<(), CoreError> {
    if ids.len() < 2 {
        return Err(CoreError::validation(format!(
            "a correlation matrix needs at least 2 product ids, got {}",
            ids.len()
        )));
    }
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(CoreError::validation("product ids must not be empty"));
        }
        if !seen.insert(id.as_str()) {
            return Err(CoreError::validation(format!("duplicate product id '{id}'")));
        }
    }
    Ok(())
}

/// Runs pairwise correlation on a dedicated, bounded worker pool.
#[derive(Clone)]
pub struct CorrelationAnalyzer {
    pool: Arc<rayon::ThreadPool>,
}

impl CorrelationAnalyzer {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("correlate-{i}"))
            .build()
            .context("failed to build correlation worker pool")?;
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Evaluate `pairs` (indices into `series`) in parallel. Pairs reached
    /// after the deadline come back `None`; output order matches input order.
    fn run_pairs(
        &self,
        series: &[SeriesData],
        pairs: &[(usize, usize)],
        window: TimeWindow,
        deadline: Deadline,
    ) -> Vec<Option<CorrelationResult>> {
        self.pool.install(|| {
            pairs
                .par_iter()
                .map(|&(i, j)| {
                    if deadline.expired() {
                        return None;
                    }
                    let result = correlate(&series[i], &series[j], window);
                    debug!(a = %result.series_a, b = %result.series_b, n = result.n, r = ?result.coefficient, "pair");
                    Some(result)
                })
                .collect()
        })
    }

    fn all_pairs(
        &self,
        mut series: Vec<SeriesData>,
        window: TimeWindow,
        deadline: Deadline,
    ) -> (Vec<CorrelationResult>, bool) {
        series.sort_by(|a, b| a.id().cmp(b.id()));
        let pairs: Vec<(usize, usize)> = (0..series.len())
            .flat_map(|i| ((i + 1)..series.len()).map(move |j| (i, j)))
            .collect();

        let outcomes = self.run_pairs(&series, &pairs, window, deadline);
        let truncated = outcomes.iter().any(Option::is_none);
        let mut results: Vec<CorrelationResult> = outcomes.into_iter().flatten().collect();
        rank(&mut results);
        (results, truncated)
    }

    /// Ranked correlations over every unordered pair of `series`, within the
    /// `window` days ending at `end`.
    pub fn analyze(
        &self,
        series: &[SeriesData],
        window: TimeWindow,
        end: NaiveDate,
        deadline: Deadline,
    ) -> CorrelationReport {
        let range = window.ending(end);
        let (correlations, truncated) = self.all_pairs(restrict(series, range), window, deadline);
        if truncated {
            warn!(computed = correlations.len(), "correlation deadline exceeded, returning partial results");
        }
        info!(series = series.len(), pairs = correlations.len(), %window, "correlations computed");
        CorrelationReport {
            partial: truncated || correlations.iter().any(|c| c.coefficient.is_none()),
            correlations,
            window_days: window.days(),
            range,
            truncated,
        }
    }

    /// Correlations between sector composites built from `series`.
    pub fn sector_correlations(
        &self,
        series: &[SeriesData],
        window: TimeWindow,
        end: NaiveDate,
        deadline: Deadline,
    ) -> SectorReport {
        let range = window.ending(end);
        let (sectors, composites): (Vec<_>, Vec<_>) =
            sector_composites(&restrict(series, range)).into_iter().unzip();
        let (correlations, truncated) = self.all_pairs(composites, window, deadline);
        info!(sectors = sectors.len(), pairs = correlations.len(), %window, "sector correlations computed");
        SectorReport {
            partial: truncated || correlations.iter().any(|c| c.coefficient.is_none()),
            sectors,
            correlations,
            window_days: window.days(),
            range,
            truncated,
        }
    }

    /// Full symmetric matrix over `ids`. Each unordered pair is computed once
    /// and mirrored; the diagonal is fixed at 1.0.
    pub fn matrix(
        &self,
        ids: &[String],
        series: &[SeriesData],
        window: TimeWindow,
        end: NaiveDate,
        deadline: Deadline,
    ) -> Result<CorrelationMatrix, CoreError> {
        validate_matrix_ids(ids)?;
        let range = window.ending(end);
        let windowed = restrict(series, range);

        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            let found = windowed
                .iter()
                .find(|s| s.id() == id)
                .ok_or_else(|| CoreError::not_found("product", id))?;
            ordered.push(found.clone());
        }

        let n = ordered.len();
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        let outcomes = self.run_pairs(&ordered, &pairs, window, deadline);

        let mut cells = vec![vec![None; n]; n];
        for (i, row) in cells.iter_mut().enumerate() {
            row[i] = Some(1.0);
        }
        let mut truncated = false;
        let mut computed = Vec::with_capacity(pairs.len());
        for (&(i, j), outcome) in pairs.iter().zip(outcomes) {
            match outcome {
                Some(result) => {
                    cells[i][j] = result.coefficient;
                    cells[j][i] = result.coefficient;
                    computed.push(result);
                }
                None => truncated = true,
            }
        }
        rank(&mut computed);

        Ok(CorrelationMatrix {
            ids: ids.to_vec(),
            partial: truncated || computed.iter().any(|c| c.coefficient.is_none()),
            cells,
            pairs: computed,
            window_days: window.days(),
            range,
            truncated,
        })
    }
}
