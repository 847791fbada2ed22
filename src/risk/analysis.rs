use serde::Serialize;

use crate::analysis::stats;
use crate::error::{BatchResult, Skipped};
use crate::risk::{rank, AlertRiskScore, RiskLevel, RISK_MODEL};

/// Alert counts per level. Every level is present, zero or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl LevelDistribution {
    fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
            RiskLevel::Critical => self.critical += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAnalysis {
    pub model_version: &'static str,
    pub total: usize,
    pub distribution: LevelDistribution,
    pub mean_score: Option<f64>,
    pub median_score: Option<f64>,
    pub top_risks: Vec<AlertRiskScore>,
    /// Alerts scored with at least one missing input.
    pub partial_count: usize,
    pub skipped: Vec<Skipped>,
    pub partial: bool,
    pub truncated: bool,
}

/// Aggregate a scoring batch: level distribution, mean and median composite,
/// and the `top_n` highest-risk alerts.
pub fn analyze(batch: &BatchResult<AlertRiskScore>, top_n: usize) -> RiskAnalysis {
    let mut distribution = LevelDistribution::default();
    for s in &batch.items {
        distribution.record(s.risk_level);
    }

    let scores: Vec<f64> = batch.items.iter().map(|s| s.composite_risk_score).collect();

    let mut top_risks = batch.items.clone();
    rank(&mut top_risks);
    top_risks.truncate(top_n);

    RiskAnalysis {
        model_version: RISK_MODEL.version,
        total: batch.items.len(),
        distribution,
        mean_score: stats::mean(&scores),
        median_score: stats::median(&scores),
        top_risks,
        partial_count: batch.items.iter().filter(|s| s.partial).count(),
        skipped: batch.skipped.clone(),
        partial: batch.partial,
        truncated: batch.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::tests::scored;

    #[test]
    fn test_distribution_and_central_tendency() {
        let items = vec![
            scored("a", 10.0, 1),
            scored("b", 40.0, 2),
            scored("c", 65.0, 3),
            scored("d", 85.0, 4),
            scored("e", 90.0, 5),
        ];
        let batch = BatchResult::new(items, Vec::new(), false);
        let analysis = analyze(&batch, 2);

        assert_eq!(analysis.total, 5);
        assert_eq!(
            analysis.distribution,
            LevelDistribution { low: 1, medium: 1, high: 1, critical: 2 }
        );
        assert_eq!(analysis.mean_score, Some(58.0));
        assert_eq!(analysis.median_score, Some(65.0));
        let top: Vec<_> = analysis.top_risks.iter().map(|s| s.alert_id.as_str()).collect();
        assert_eq!(top, ["e", "d"]);
        assert!(!analysis.partial);
    }

    #[test]
    fn test_empty_batch_has_no_averages() {
        let batch: BatchResult<AlertRiskScore> = BatchResult::new(Vec::new(), Vec::new(), false);
        let analysis = analyze(&batch, 10);
        assert_eq!(analysis.total, 0);
        assert_eq!(analysis.mean_score, None);
        assert_eq!(analysis.median_score, None);
        assert_eq!(analysis.distribution, LevelDistribution::default());
    }

    #[test]
    fn test_top_ties_prefer_recent_detection() {
        let items = vec![scored("older", 75.0, 1), scored("newer", 75.0, 9)];
        let batch = BatchResult::new(items, Vec::new(), false);
        let analysis = analyze(&batch, 1);
        assert_eq!(analysis.top_risks[0].alert_id, "newer");
    }
}
