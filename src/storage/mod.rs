//! SQLite metric store -- schema, reads for the analytic core and the single
//! risk write path.

pub mod schema;

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Skipped};
use crate::model::{Alert, AlertRecord, AlertStatus, Anomaly, DateRange, Observation, Series, SeriesData};
use crate::risk::{RiskBreakdown, RiskLevel};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Risk fields to persist for one alert.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskUpdate {
    pub alert_id: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub breakdown: RiskBreakdown,
}

/// An alert row whose alert or anomaly columns could not be decoded.
#[derive(Debug, Clone)]
pub struct RejectedAlert {
    pub skipped: Skipped,
    /// Stored status, when that column was still readable.
    pub status: Option<AlertStatus>,
}

/// Alerts read from the store. Undecodable rows are set aside per row.
#[derive(Debug, Clone, Default)]
pub struct AlertRows {
    pub records: Vec<AlertRecord>,
    pub rejected: Vec<RejectedAlert>,
}

/// Everything the analytic core reads, plus the risk write path.
pub trait MetricStore: Send + Sync {
    /// Every alert joined with its anomaly, ordered by alert id.
    fn alerts(&self) -> Result<AlertRows, CoreError>;

    /// Price values for one product inside `range`, oldest first.
    fn price_history(&self, product_id: &str, range: DateRange) -> Result<Vec<f64>, CoreError>;

    /// All price series, optionally limited to one category, with their
    /// observations inside `range`.
    fn price_series(
        &self,
        category: Option<&str>,
        range: DateRange,
    ) -> Result<Vec<SeriesData>, CoreError>;

    /// The named price series. Unknown ids are a `NotFound` error.
    fn series_by_ids(&self, ids: &[String], range: DateRange) -> Result<Vec<SeriesData>, CoreError>;

    /// Most recent date carrying a price observation.
    fn latest_observation_date(&self) -> Result<Option<NaiveDate>, CoreError>;

    /// Write risk fields keyed by alert id, touching only rows whose stored
    /// values differ. Returns the number of rows changed.
    fn upsert_risk(&self, updates: &[RiskUpdate]) -> Result<usize, CoreError>;
}

fn parse_col<T: FromStr<Err = CoreError>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn series_from_row(row: &Row<'_>) -> rusqlite::Result<Series> {
    Ok(Series {
        id: row.get(0)?,
        name: row.get(1)?,
        metric: parse_col(2, &row.get::<_, String>(2)?)?,
        category: row.get(3)?,
        sector: row.get(4)?,
    })
}

const ALERT_QUERY: &str = "SELECT a.id, a.anomaly_id, a.status, a.risk_score, a.risk_level, a.risk_breakdown,
            n.id, n.type, n.product_id, n.severity, n.detected_at, n.details_json
     FROM alerts a LEFT JOIN anomalies n ON n.id = a.anomaly_id
     ORDER BY a.id";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<AlertRecord> {
    let risk_level = row
        .get::<_, Option<String>>(4)?
        .map(|s| parse_col::<RiskLevel>(4, &s))
        .transpose()?;
    // Stored breakdowns are only ever written by this crate; anything
    // unreadable is treated as not yet scored.
    let risk_breakdown = row
        .get::<_, Option<String>>(5)?
        .and_then(|s| serde_json::from_str(&s).ok());

    let alert = Alert {
        id: row.get(0)?,
        anomaly_id: row.get(1)?,
        status: parse_col(2, &row.get::<_, String>(2)?)?,
        risk_score: row.get(3)?,
        risk_level,
        risk_breakdown,
    };

    let anomaly = match row.get::<_, Option<String>>(6)? {
        None => None,
        Some(id) => {
            let detected_raw: String = row.get(10)?;
            let detected_at = DateTime::parse_from_rfc3339(&detected_raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?
                .with_timezone(&Utc);
            let details_raw: String = row.get(11)?;
            // Unparseable details surface later as a per-alert validation failure.
            let details = serde_json::from_str(&details_raw)
                .unwrap_or(serde_json::Value::String(details_raw));
            Some(Anomaly {
                id,
                kind: parse_col(7, &row.get::<_, String>(7)?)?,
                product_id: row.get(8)?,
                severity: parse_col(9, &row.get::<_, String>(9)?)?,
                detected_at,
                details,
            })
        }
    };

    Ok(AlertRecord { alert, anomaly })
}

fn decode_alert(row: &Row<'_>) -> Result<AlertRecord, RejectedAlert> {
    alert_from_row(row).map_err(|e| {
        let id = row
            .get::<_, String>(0)
            .unwrap_or_else(|_| "unknown".to_string());
        let status = row
            .get::<_, String>(2)
            .ok()
            .and_then(|s| s.parse().ok());
        RejectedAlert {
            skipped: Skipped::new(id, &CoreError::from(e)),
            status,
        }
    })
}

/// [`MetricStore`] over the SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn points(
        &self,
        conn: &rusqlite::Connection,
        series_id: &str,
        range: DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>, CoreError> {
        let mut stmt = conn.prepare_cached(
            "SELECT date, value FROM observations
             WHERE series_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(
            params![series_id, range.start.to_string(), range.end.to_string()],
            |row| Ok((parse_date(0, &row.get::<_, String>(0)?)?, row.get::<_, f64>(1)?)),
        )?;
        let mut points = Vec::new();
        for r in rows {
            points.push(r?);
        }
        Ok(points)
    }
}

impl MetricStore for SqliteStore {
    fn alerts(&self) -> Result<AlertRows, CoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(ALERT_QUERY)?;
        let rows = stmt.query_map([], |row| Ok(decode_alert(row)))?;
        let mut out = AlertRows::default();
        for r in rows {
            match r? {
                Ok(record) => out.records.push(record),
                Err(rejected) => {
                    warn!(
                        alert = %rejected.skipped.id,
                        reason = %rejected.skipped.reason,
                        "unreadable alert row"
                    );
                    out.rejected.push(rejected);
                }
            }
        }
        debug!(
            alerts = out.records.len(),
            rejected = out.rejected.len(),
            "loaded alerts"
        );
        Ok(out)
    }

    fn price_history(&self, product_id: &str, range: DateRange) -> Result<Vec<f64>, CoreError> {
        let conn = self.pool.get()?;
        Ok(self
            .points(&conn, product_id, range)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    fn price_series(
        &self,
        category: Option<&str>,
        range: DateRange,
    ) -> Result<Vec<SeriesData>, CoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.metric, s.category, s.sector, o.date, o.value
             FROM series s
             LEFT JOIN observations o
               ON o.series_id = s.id AND o.date BETWEEN ?1 AND ?2
             WHERE s.metric = 'price' AND (?3 IS NULL OR s.category = ?3)
             ORDER BY s.id, o.date",
        )?;
        let rows = stmt.query_map(
            params![range.start.to_string(), range.end.to_string(), category],
            |row| {
                let series = series_from_row(row)?;
                let point = match row.get::<_, Option<String>>(5)? {
                    Some(date) => Some((parse_date(5, &date)?, row.get::<_, f64>(6)?)),
                    None => None,
                };
                Ok((series, point))
            },
        )?;

        let mut grouped: BTreeMap<String, SeriesData> = BTreeMap::new();
        for r in rows {
            let (series, point) = r?;
            let entry = grouped.entry(series.id.clone()).or_insert_with(|| SeriesData {
                series,
                points: Vec::new(),
            });
            if let Some(p) = point {
                entry.points.push(p);
            }
        }
        debug!(series = grouped.len(), ?category, "loaded price series");
        Ok(grouped.into_values().collect())
    }

    fn series_by_ids(&self, ids: &[String], range: DateRange) -> Result<Vec<SeriesData>, CoreError> {
        let conn = self.pool.get()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let series = conn
                .query_row(
                    "SELECT id, name, metric, category, sector FROM series
                     WHERE id = ?1 AND metric = 'price'",
                    params![id],
                    series_from_row,
                )
                .optional()?
                .ok_or_else(|| CoreError::not_found("product", id))?;
            let points = self.points(&conn, id, range)?;
            out.push(SeriesData { series, points });
        }
        Ok(out)
    }

    fn latest_observation_date(&self) -> Result<Option<NaiveDate>, CoreError> {
        let conn = self.pool.get()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(o.date) FROM observations o
             JOIN series s ON s.id = o.series_id
             WHERE s.metric = 'price'",
            [],
            |row| row.get(0),
        )?;
        Ok(latest.map(|d| parse_date(0, &d)).transpose()?)
    }

    fn upsert_risk(&self, updates: &[RiskUpdate]) -> Result<usize, CoreError> {
        let mut conn = self.pool.get()?;
        // Take the write lock up front so concurrent batches serialize
        // instead of failing to upgrade a read transaction.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE alerts
                 SET risk_score = ?1, risk_level = ?2, risk_breakdown = ?3,
                     risk_updated_at = ?4
                 WHERE id = ?5
                   AND (risk_score IS NOT ?1 OR risk_level IS NOT ?2 OR risk_breakdown IS NOT ?3)",
            )?;
            let now = Utc::now().to_rfc3339();
            for u in updates {
                let breakdown = serde_json::to_string(&u.breakdown)
                    .map_err(|e| CoreError::Store(e.into()))?;
                changed += stmt.execute(params![
                    u.risk_score,
                    u.risk_level.as_str(),
                    breakdown,
                    now,
                    u.alert_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }
}

/// Seed document accepted by [`import_fixture`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub series: Vec<Series>,
    pub observations: Vec<Observation>,
    pub anomalies: Vec<Anomaly>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub series: usize,
    pub observations: usize,
    pub anomalies: usize,
    pub alerts: usize,
}

/// Load a fixture into the store. Re-importing replaces rows by key; alert
/// risk fields already stored are kept.
pub fn import_fixture(pool: &Pool, fixture: &Fixture) -> Result<ImportSummary> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    for s in &fixture.series {
        tx.execute(
            "INSERT OR REPLACE INTO series (id, name, metric, category, sector)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![s.id, s.name, s.metric.as_str(), s.category, s.sector],
        )
        .with_context(|| format!("failed to import series {}", s.id))?;
    }

    for o in &fixture.observations {
        tx.execute(
            "INSERT OR REPLACE INTO observations (series_id, date, value, source)
             VALUES (?1, ?2, ?3, ?4)",
            params![o.series_id, o.date.to_string(), o.value, o.source],
        )
        .with_context(|| format!("failed to import observation {} {}", o.series_id, o.date))?;
    }

    for a in &fixture.anomalies {
        tx.execute(
            "INSERT OR REPLACE INTO anomalies (id, type, product_id, severity, detected_at, details_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                a.id,
                a.kind.as_str(),
                a.product_id,
                a.severity.as_str(),
                a.detected_at.to_rfc3339(),
                serde_json::to_string(&a.details)?
            ],
        )
        .with_context(|| format!("failed to import anomaly {}", a.id))?;
    }

    for a in &fixture.alerts {
        tx.execute(
            "INSERT INTO alerts (id, anomaly_id, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET anomaly_id = excluded.anomaly_id, status = excluded.status",
            params![a.id, a.anomaly_id, a.status.as_str()],
        )
        .with_context(|| format!("failed to import alert {}", a.id))?;
    }

    tx.commit()?;

    let summary = ImportSummary {
        series: fixture.series.len(),
        observations: fixture.observations.len(),
        anomalies: fixture.anomalies.len(),
        alerts: fixture.alerts.len(),
    };
    info!(?summary, "fixture imported");
    Ok(summary)
}
