use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::analysis::stats;
use crate::error::{BatchResult, CoreError, Skipped};
use crate::model::{AlertRecord, DateRange, Deadline};
use crate::risk::{rank, AlertRiskScore, RiskBreakdown, RiskInput, RiskLevel, ScoringPolicy, RISK_MODEL};

/// Map an input magnitude onto [0, 100] against its threshold.
fn normalize(value: f64, threshold: f64) -> f64 {
    (100.0 * value.abs() / threshold).min(100.0)
}

/// Price history range used for the volatility sub-score of an anomaly
/// detected at `detected_at`. Anchored to the detection date, not the clock.
pub fn history_range(detected_at: DateTime<Utc>) -> DateRange {
    let end = detected_at.date_naive();
    DateRange {
        start: end - Duration::days(RISK_MODEL.history_window_days - 1),
        end,
    }
}

/// Score a single alert from its anomaly context and the product's recent
/// prices. Missing inputs score 0 and mark the result partial.
pub fn score_alert(record: &AlertRecord, prices: &[f64]) -> Result<AlertRiskScore, CoreError> {
    let alert = &record.alert;
    let anomaly = record
        .anomaly
        .as_ref()
        .ok_or_else(|| CoreError::not_found("anomaly", &alert.anomaly_id))?;
    let ctx = anomaly.context()?;
    let t = RISK_MODEL.thresholds;

    let freight = ctx.freight_change_pct.map(|v| normalize(v, t.freight_surge_pct));
    let tariff = ctx.tariff_change_pct.map(|v| normalize(v, t.tariff_change_pts));
    let supply_chain = match (freight, tariff) {
        (Some(f), Some(x)) => Some(f.max(x)),
        (f, x) => f.or(x),
    };
    let volatility = stats::coefficient_of_variation(prices)
        .map(|cv| normalize(cv * 100.0, t.volatility_cv_pct));

    let mut missing = Vec::new();
    let mut take = |value: Option<f64>, input: RiskInput| {
        value.unwrap_or_else(|| {
            missing.push(input);
            0.0
        })
    };

    let price_deviation = take(
        ctx.price_change_pct.map(|v| normalize(v, t.price_spike_pct)),
        RiskInput::PriceChange,
    );
    let volume_surge = take(
        ctx.volume_change_pct.map(|v| normalize(v, t.volume_surge_pct)),
        RiskInput::VolumeChange,
    );
    let fx_exposure = take(
        ctx.fx_change_pct.map(|v| normalize(v, t.fx_move_pct)),
        RiskInput::FxChange,
    );
    let supply_chain_risk = take(supply_chain, RiskInput::SupplyChain);
    let historical_volatility = take(volatility, RiskInput::PriceHistory);

    let breakdown = RiskBreakdown {
        price_deviation,
        volume_surge,
        fx_exposure,
        supply_chain_risk,
        historical_volatility,
    };
    let score = breakdown.composite();

    Ok(AlertRiskScore {
        alert_id: alert.id.clone(),
        anomaly_id: anomaly.id.clone(),
        product_id: anomaly.product_id.clone(),
        anomaly_type: anomaly.kind,
        status: alert.status,
        detected_at: anomaly.detected_at,
        composite_risk_score: score,
        risk_level: RiskLevel::from_score(score),
        risk_breakdown: breakdown,
        partial: !missing.is_empty(),
        missing_inputs: missing,
    })
}

/// Score every alert admitted by `policy`. `prices` is keyed by alert id.
/// Failures are collected per alert; results come back ranked.
pub fn score_alerts(
    records: &[AlertRecord],
    prices: &HashMap<String, Vec<f64>>,
    policy: ScoringPolicy,
    deadline: Deadline,
) -> BatchResult<AlertRiskScore> {
    let mut items = Vec::new();
    let mut skipped = Vec::new();
    let mut truncated = false;

    for record in records.iter().filter(|r| policy.includes(r.alert.status)) {
        if deadline.expired() {
            truncated = true;
            break;
        }
        let history = prices.get(&record.alert.id).map(Vec::as_slice).unwrap_or(&[]);
        match score_alert(record, history) {
            Ok(scored) => {
                debug!(alert = %scored.alert_id, score = scored.composite_risk_score, "scored alert");
                items.push(scored);
            }
            Err(e) => {
                warn!(alert = %record.alert.id, error = %e, "skipping alert");
                skipped.push(Skipped::new(&record.alert.id, &e));
            }
        }
    }

    if truncated {
        warn!(scored = items.len(), "risk scoring deadline exceeded, returning partial results");
    }

    rank(&mut items);
    let any_partial = items.iter().any(|s| s.partial);
    BatchResult::new(items, skipped, any_partial).with_truncated(truncated)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Alert, AlertStatus, Anomaly, AnomalySeverity, AnomalyType};
    use chrono::TimeZone;
    use serde_json::json;

    pub(crate) fn record(id: &str, status: AlertStatus, details: serde_json::Value) -> AlertRecord {
        AlertRecord {
            alert: Alert {
                id: id.to_string(),
                anomaly_id: format!("an-{id}"),
                status,
                risk_score: None,
                risk_level: None,
                risk_breakdown: None,
            },
            anomaly: Some(Anomaly {
                id: format!("an-{id}"),
                kind: AnomalyType::PriceSpike,
                product_id: "steel-coil".to_string(),
                severity: AnomalySeverity::High,
                detected_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
                details,
            }),
        }
    }

    #[test]
    fn test_full_context_scores_without_partial_flag() {
        let r = record(
            "a1",
            AlertStatus::New,
            json!({
                "price_change_pct": 30.0,
                "volume_change_pct": 25.0,
                "fx_change_pct": -2.5,
                "freight_change_pct": 15.0,
                "tariff_change_pct": 10.0
            }),
        );
        let prices = [100.0, 100.0, 100.0, 100.0];
        let s = score_alert(&r, &prices).unwrap();

        assert_eq!(s.risk_breakdown.price_deviation, 100.0);
        assert_eq!(s.risk_breakdown.volume_surge, 50.0);
        assert_eq!(s.risk_breakdown.fx_exposure, 50.0);
        // Tariff saturates and wins over freight (50).
        assert_eq!(s.risk_breakdown.supply_chain_risk, 100.0);
        assert_eq!(s.risk_breakdown.historical_volatility, 0.0);
        assert!(!s.partial);

        // 0.3*100 + 0.2*50 + 0.2*50 + 0.15*100 + 0.15*0 = 65
        assert!((s.composite_risk_score - 65.0).abs() < 1e-9);
        assert_eq!(s.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_missing_inputs_score_zero_and_flag_partial() {
        let r = record("a2", AlertStatus::New, json!({ "price_change_pct": 10.0 }));
        let s = score_alert(&r, &[]).unwrap();
        assert_eq!(s.risk_breakdown.price_deviation, 50.0);
        assert_eq!(s.risk_breakdown.volume_surge, 0.0);
        assert!(s.partial);
        assert_eq!(
            s.missing_inputs,
            vec![
                RiskInput::VolumeChange,
                RiskInput::FxChange,
                RiskInput::SupplyChain,
                RiskInput::PriceHistory
            ]
        );
        assert!((s.composite_risk_score - 15.0).abs() < 1e-9);
        assert_eq!(s.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_breakdown_reproduces_composite() {
        let r = record(
            "a3",
            AlertStatus::Viewed,
            json!({ "price_change_pct": 7.0, "fx_change_pct": 1.2, "freight_change_pct": 40.0 }),
        );
        let s = score_alert(&r, &[90.0, 110.0, 95.0, 105.0]).unwrap();
        assert_eq!(s.composite_risk_score, s.risk_breakdown.composite());
    }

    #[test]
    fn test_batch_isolates_failures_and_honours_policy() {
        let mut orphan = record("orphan", AlertStatus::New, json!({}));
        orphan.anomaly = None;
        let records = vec![
            record("ok", AlertStatus::New, json!({ "price_change_pct": 40.0 })),
            record("bad", AlertStatus::New, json!({ "price_change_pct": "lots" })),
            record("done", AlertStatus::Resolved, json!({ "price_change_pct": 40.0 })),
            orphan,
        ];

        let batch = score_alerts(&records, &HashMap::new(), ScoringPolicy::ActiveOnly, Deadline::none());
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].alert_id, "ok");
        assert_eq!(batch.skipped.len(), 2);
        assert!(batch.partial);
        assert!(!batch.truncated);

        let all = score_alerts(&records, &HashMap::new(), ScoringPolicy::All, Deadline::none());
        assert_eq!(all.items.len(), 2);
    }

    #[test]
    fn test_expired_deadline_truncates() {
        let records = vec![record("a", AlertStatus::New, json!({}))];
        let batch = score_alerts(
            &records,
            &HashMap::new(),
            ScoringPolicy::All,
            Deadline::after(std::time::Duration::ZERO),
        );
        assert!(batch.items.is_empty());
        assert!(batch.truncated);
        assert!(batch.partial);
    }

    #[test]
    fn test_history_range_anchors_on_detection_date() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 0).unwrap();
        let range = history_range(at);
        assert_eq!(range.end, at.date_naive());
        assert_eq!((range.end - range.start).num_days(), 89);
    }
}
