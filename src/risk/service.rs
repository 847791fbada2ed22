//! Store-backed risk operations: fetch alerts and price history, score, and
//! persist.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{BatchResult, CoreError, Skipped};
use crate::model::{AlertRecord, Deadline};
use crate::risk::score::history_range;
use crate::risk::{analyze, score_alerts, AlertRiskScore, RiskAnalysis, ScoringPolicy};
use crate::storage::{MetricStore, RiskUpdate};

/// Outcome of a persistence run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskUpdateSummary {
    /// Alerts whose stored risk fields changed.
    pub updated: usize,
    /// Alerts scored in this run.
    pub considered: usize,
    pub skipped: Vec<Skipped>,
}

pub struct RiskService<'a> {
    store: &'a dyn MetricStore,
}

impl<'a> RiskService<'a> {
    pub fn new(store: &'a dyn MetricStore) -> Self {
        Self { store }
    }

    /// Price history per alert id. An alert whose history cannot be read is
    /// dropped from the map and reported in `failed`.
    fn histories(
        &self,
        records: &[AlertRecord],
        policy: ScoringPolicy,
        deadline: Deadline,
    ) -> (HashMap<String, Vec<f64>>, Vec<Skipped>) {
        let mut prices = HashMap::new();
        let mut failed = Vec::new();
        for record in records.iter().filter(|r| policy.includes(r.alert.status)) {
            if deadline.expired() {
                break;
            }
            let Some(anomaly) = &record.anomaly else {
                continue;
            };
            match self
                .store
                .price_history(&anomaly.product_id, history_range(anomaly.detected_at))
            {
                Ok(history) => {
                    prices.insert(record.alert.id.clone(), history);
                }
                Err(e) => {
                    warn!(alert = %record.alert.id, error = %e, "price history unavailable");
                    failed.push(Skipped::new(&record.alert.id, &e));
                }
            }
        }
        (prices, failed)
    }

    fn score(
        &self,
        policy: ScoringPolicy,
        deadline: Deadline,
    ) -> Result<BatchResult<AlertRiskScore>, CoreError> {
        let rows = self.store.alerts()?;
        // A row with an unreadable status is reported under every policy.
        let mut skipped: Vec<Skipped> = rows
            .rejected
            .into_iter()
            .filter(|r| r.status.map_or(true, |s| policy.includes(s)))
            .map(|r| r.skipped)
            .collect();

        let (prices, failed) = self.histories(&rows.records, policy, deadline);
        let failed_ids: HashSet<String> = failed.iter().map(|s| s.id.clone()).collect();
        skipped.extend(failed);

        let remaining: Vec<AlertRecord> = rows
            .records
            .into_iter()
            .filter(|r| !failed_ids.contains(&r.alert.id))
            .collect();
        let mut batch = score_alerts(&remaining, &prices, policy, deadline);
        if !skipped.is_empty() {
            batch.skipped.extend(skipped);
            batch.partial = true;
        }
        Ok(batch)
    }

    /// Score every alert admitted by `policy`, ranked highest risk first.
    pub fn calculate_risk_scores(
        &self,
        policy: ScoringPolicy,
        deadline: Deadline,
    ) -> Result<BatchResult<AlertRiskScore>, CoreError> {
        self.score(policy, deadline)
    }

    pub fn risk_analysis(
        &self,
        policy: ScoringPolicy,
        top_n: usize,
        deadline: Deadline,
    ) -> Result<RiskAnalysis, CoreError> {
        Ok(analyze(&self.score(policy, deadline)?, top_n))
    }

    /// Recompute every alert, resolved ones included, and write the results
    /// back. Rows whose stored values already match are left untouched, so
    /// `updated` is 0 on a repeat run with unchanged inputs.
    pub fn update_alert_risk_scores(&self) -> Result<RiskUpdateSummary, CoreError> {
        let batch = self.score(ScoringPolicy::All, Deadline::none())?;
        let updates: Vec<RiskUpdate> = batch
            .items
            .iter()
            .map(|s| RiskUpdate {
                alert_id: s.alert_id.clone(),
                risk_score: s.composite_risk_score,
                risk_level: s.risk_level,
                breakdown: s.risk_breakdown,
            })
            .collect();

        let updated = self.store.upsert_risk(&updates)?;
        info!(
            updated,
            considered = updates.len(),
            skipped = batch.skipped.len(),
            "risk scores persisted"
        );
        Ok(RiskUpdateSummary {
            updated,
            considered: updates.len(),
            skipped: batch.skipped,
        })
    }
}
