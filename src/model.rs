//! Shared data model: observations, series, anomalies, alerts and the
//! bounded time window every entry point accepts.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::risk::{RiskBreakdown, RiskLevel};

/// Metric a series carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Price,
    Tariff,
    Freight,
    Fx,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Price => "price",
            Metric::Tariff => "tariff",
            Metric::Freight => "freight",
            Metric::Fx => "fx",
        }
    }
}

impl FromStr for Metric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" => Ok(Metric::Price),
            "tariff" => Ok(Metric::Tariff),
            "freight" => Ok(Metric::Freight),
            "fx" => Ok(Metric::Fx),
            other => Err(CoreError::validation(format!("unknown metric '{other}'"))),
        }
    }
}

/// One timestamped value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub series_id: String,
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub source: Option<String>,
}

/// Series metadata. For price series the id is the product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub metric: Metric,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
}

/// A series together with its observations inside a requested range,
/// sorted by date.
#[derive(Debug, Clone)]
pub struct SeriesData {
    pub series: Series,
    pub points: Vec<(NaiveDate, f64)>,
}

impl SeriesData {
    pub fn id(&self) -> &str {
        &self.series.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    PriceSpike,
    TariffChange,
    FreightSurge,
    FxVolatility,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::PriceSpike => "price_spike",
            AnomalyType::TariffChange => "tariff_change",
            AnomalyType::FreightSurge => "freight_surge",
            AnomalyType::FxVolatility => "fx_volatility",
        }
    }
}

impl FromStr for AnomalyType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_spike" => Ok(AnomalyType::PriceSpike),
            "tariff_change" => Ok(AnomalyType::TariffChange),
            "freight_surge" => Ok(AnomalyType::FreightSurge),
            "fx_volatility" => Ok(AnomalyType::FxVolatility),
            other => Err(CoreError::validation(format!("unknown anomaly type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySeverity::Low => "low",
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
            AnomalySeverity::Critical => "critical",
        }
    }
}

impl FromStr for AnomalySeverity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(AnomalySeverity::Low),
            "medium" => Ok(AnomalySeverity::Medium),
            "high" => Ok(AnomalySeverity::High),
            "critical" => Ok(AnomalySeverity::Critical),
            other => Err(CoreError::validation(format!("unknown severity '{other}'"))),
        }
    }
}

/// A detected deviation event, as produced by the detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AnomalyType,
    pub product_id: String,
    pub severity: AnomalySeverity,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Anomaly {
    pub fn context(&self) -> Result<AnomalyDetails, CoreError> {
        AnomalyDetails::from_value(&self.details)
    }
}

/// Typed view of the context fields the risk scorer reads from an anomaly's
/// details. Every field is optional; absent means "not supplied", never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetails {
    pub price_change_pct: Option<f64>,
    pub volume_change_pct: Option<f64>,
    pub fx_change_pct: Option<f64>,
    pub freight_change_pct: Option<f64>,
    /// Change in tariff rate, in percentage points.
    pub tariff_change_pct: Option<f64>,
}

impl AnomalyDetails {
    /// Parse from the stored details document. `null` is an empty context;
    /// anything other than an object, or a non-numeric known field, is rejected.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CoreError> {
        match value {
            serde_json::Value::Null => Ok(Self::default()),
            serde_json::Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| CoreError::validation(format!("malformed anomaly details: {e}"))),
            _ => Err(CoreError::validation("anomaly details must be an object")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Viewed,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Viewed => "viewed",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(AlertStatus::New),
            "viewed" => Ok(AlertStatus::Viewed),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(CoreError::validation(format!("unknown alert status '{other}'"))),
        }
    }
}

/// A tracked instance of an anomaly. Risk fields stay `None` until scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub anomaly_id: String,
    pub status: AlertStatus,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub risk_breakdown: Option<RiskBreakdown>,
}

/// An alert joined with its anomaly. `anomaly` is `None` when the
/// referenced anomaly does not exist in the store.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub alert: Alert,
    pub anomaly: Option<Anomaly>,
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Number of trailing days an analysis covers, validated to [7, 365].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TimeWindow(u32);

impl TimeWindow {
    pub const MIN_DAYS: i64 = 7;
    pub const MAX_DAYS: i64 = 365;
    pub const DEFAULT_DAYS: u32 = 90;

    pub fn new(days: i64) -> Result<Self, CoreError> {
        if !(Self::MIN_DAYS..=Self::MAX_DAYS).contains(&days) {
            return Err(CoreError::validation(format!(
                "time window must be between {} and {} days, got {days}",
                Self::MIN_DAYS,
                Self::MAX_DAYS
            )));
        }
        Ok(Self(days as u32))
    }

    pub fn days(&self) -> u32 {
        self.0
    }

    /// The `days`-long range whose last day is `end`.
    pub fn ending(&self, end: NaiveDate) -> DateRange {
        DateRange {
            start: end - Duration::days(i64::from(self.0) - 1),
            end,
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self(Self::DEFAULT_DAYS)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.0)
    }
}

/// Computation deadline for request-serving callers. `Deadline::none()`
/// never expires, which keeps CLI and test runs complete.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(budget: std::time::Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}
