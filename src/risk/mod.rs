//! Risk Scorer -- composite risk scores for alerts, aggregate analysis and
//! idempotent persistence of the scored fields.

pub mod analysis;
pub mod score;
pub mod service;

pub use self::analysis::{analyze, RiskAnalysis};
pub use self::score::{score_alert, score_alerts};
pub use self::service::{RiskService, RiskUpdateSummary};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{AlertStatus, AnomalyType};

/// Weights of the five sub-scores. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskWeights {
    pub price_deviation: f64,
    pub volume_surge: f64,
    pub fx_exposure: f64,
    pub supply_chain_risk: f64,
    pub historical_volatility: f64,
}

impl RiskWeights {
    pub fn total(&self) -> f64 {
        self.price_deviation
            + self.volume_surge
            + self.fx_exposure
            + self.supply_chain_risk
            + self.historical_volatility
    }
}

/// Input magnitude (in percent) that maps to a sub-score of 100.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NormalizationThresholds {
    pub price_spike_pct: f64,
    pub volume_surge_pct: f64,
    pub fx_move_pct: f64,
    pub freight_surge_pct: f64,
    /// Percentage points of tariff rate change.
    pub tariff_change_pts: f64,
    /// Coefficient of variation of recent prices, in percent.
    pub volatility_cv_pct: f64,
}

/// Lower bounds of each level above `low`, ascending.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LevelLadder {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

/// The deployed scoring table. Changing it means shipping a new version.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskModel {
    pub version: &'static str,
    pub weights: RiskWeights,
    pub thresholds: NormalizationThresholds,
    pub levels: LevelLadder,
    /// Trailing days of price history used for the volatility sub-score.
    pub history_window_days: i64,
}

pub const RISK_MODEL: RiskModel = RiskModel {
    version: "2024.1",
    weights: RiskWeights {
        price_deviation: 0.30,
        volume_surge: 0.20,
        fx_exposure: 0.20,
        supply_chain_risk: 0.15,
        historical_volatility: 0.15,
    },
    thresholds: NormalizationThresholds {
        price_spike_pct: 20.0,
        volume_surge_pct: 50.0,
        fx_move_pct: 5.0,
        freight_surge_pct: 30.0,
        tariff_change_pts: 10.0,
        volatility_cv_pct: 15.0,
    },
    levels: LevelLadder {
        medium: 35.0,
        high: 60.0,
        critical: 80.0,
    },
    history_window_days: 90,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Classify a composite score with the fixed ladder.
    pub fn from_score(score: f64) -> Self {
        let ladder = RISK_MODEL.levels;
        if score >= ladder.critical {
            RiskLevel::Critical
        } else if score >= ladder.high {
            RiskLevel::High
        } else if score >= ladder.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(CoreError::validation(format!("unknown risk level '{other}'"))),
        }
    }
}

/// Sub-scores feeding the composite, each in [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub price_deviation: f64,
    pub volume_surge: f64,
    pub fx_exposure: f64,
    pub supply_chain_risk: f64,
    pub historical_volatility: f64,
}

impl RiskBreakdown {
    /// Weighted sum under the deployed weights, clamped to [0, 100].
    pub fn composite(&self) -> f64 {
        let w = RISK_MODEL.weights;
        let sum = w.price_deviation * self.price_deviation
            + w.volume_surge * self.volume_surge
            + w.fx_exposure * self.fx_exposure
            + w.supply_chain_risk * self.supply_chain_risk
            + w.historical_volatility * self.historical_volatility;
        sum.clamp(0.0, 100.0)
    }
}

/// Context inputs that can be absent for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskInput {
    PriceChange,
    VolumeChange,
    FxChange,
    SupplyChain,
    PriceHistory,
}

/// Scored view of one alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRiskScore {
    pub alert_id: String,
    pub anomaly_id: String,
    pub product_id: String,
    pub anomaly_type: AnomalyType,
    pub status: AlertStatus,
    pub detected_at: DateTime<Utc>,
    pub composite_risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_breakdown: RiskBreakdown,
    /// Set when one or more inputs were missing and scored as 0.
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_inputs: Vec<RiskInput>,
}

/// Which alerts a scoring run considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringPolicy {
    /// Skip alerts whose status is `resolved`.
    #[default]
    ActiveOnly,
    All,
}

impl ScoringPolicy {
    pub fn includes(&self, status: AlertStatus) -> bool {
        match self {
            ScoringPolicy::ActiveOnly => status != AlertStatus::Resolved,
            ScoringPolicy::All => true,
        }
    }
}

/// Caller-side filtering: minimum score, then level, then limit.
#[derive(Debug, Clone, Default)]
pub struct RiskFilter {
    pub min_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub limit: Option<usize>,
}

impl RiskFilter {
    pub fn apply(&self, scores: Vec<AlertRiskScore>) -> Vec<AlertRiskScore> {
        let mut out: Vec<AlertRiskScore> = scores
            .into_iter()
            .filter(|s| self.min_score.map_or(true, |min| s.composite_risk_score >= min))
            .filter(|s| self.risk_level.map_or(true, |level| s.risk_level == level))
            .collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Highest score first; ties go to the most recently detected, then alert id.
pub fn rank(scores: &mut [AlertRiskScore]) {
    scores.sort_by(|a, b| {
        b.composite_risk_score
            .total_cmp(&a.composite_risk_score)
            .then_with(|| b.detected_at.cmp(&a.detected_at))
            .then_with(|| a.alert_id.cmp(&b.alert_id))
    });
}
