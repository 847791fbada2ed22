//! API route definitions.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::analysis::service::{self as correlation, parse_ids};
use crate::analysis::{CorrelationKind, CorrelationOutput, CorrelationRequest};
use crate::model::{Deadline, TimeWindow};
use crate::risk::{RiskFilter, RiskLevel, RiskService, ScoringPolicy, RISK_MODEL};
use crate::scenario::{templates, ScenarioOutput, ScenarioRequest};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/risk-scores", get(risk_scores).post(update_risk_scores))
        .route("/correlation", get(correlations))
        .route("/scenario", post(model_scenarios))
        .route("/scenario/templates", get(scenario_templates))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "risk_model": RISK_MODEL.version,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskQuery {
    min_score: Option<f64>,
    risk_level: Option<String>,
    limit: Option<usize>,
    mode: Option<String>,
    #[serde(default)]
    include_resolved: bool,
}

async fn risk_scores(
    State(state): State<AppState>,
    query: Result<Query<RiskQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(q) = query?;
    let policy = if q.include_resolved {
        ScoringPolicy::All
    } else {
        ScoringPolicy::ActiveOnly
    };
    let deadline = Deadline::after(state.analysis.deadline());

    match q.mode.as_deref().unwrap_or("scores") {
        "analysis" => {
            let top_n = state.analysis.top_n;
            let analysis = tokio::task::spawn_blocking(move || {
                RiskService::new(state.store.as_ref()).risk_analysis(policy, top_n, deadline)
            })
            .await??;
            Ok(Json(json!({ "analysis": analysis })))
        }
        "scores" => {
            let filter = RiskFilter {
                min_score: q.min_score,
                risk_level: q
                    .risk_level
                    .as_deref()
                    .map(|s| s.parse::<RiskLevel>())
                    .transpose()?,
                limit: q.limit,
            };
            let batch = tokio::task::spawn_blocking(move || {
                RiskService::new(state.store.as_ref()).calculate_risk_scores(policy, deadline)
            })
            .await??;
            let scores = filter.apply(batch.items);
            Ok(Json(json!({
                "risk_scores": scores,
                "total": scores.len(),
                "partial": batch.partial,
                "truncated": batch.truncated,
                "skipped": batch.skipped,
            })))
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown mode '{other}', expected scores or analysis"
        ))),
    }
}

async fn update_risk_scores(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = tokio::task::spawn_blocking(move || {
        RiskService::new(state.store.as_ref()).update_alert_risk_scores()
    })
    .await??;

    Ok(Json(json!({
        "success": true,
        "updated": summary.updated,
        "considered": summary.considered,
        "skipped": summary.skipped,
        "message": format!(
            "risk scores updated for {} of {} alerts",
            summary.updated, summary.considered
        ),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationQuery {
    category: Option<String>,
    time_window: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    product_ids: Option<String>,
}

async fn correlations(
    State(state): State<AppState>,
    query: Result<Query<CorrelationQuery>, QueryRejection>,
) -> Result<Json<CorrelationOutput>, ApiError> {
    let Query(q) = query?;
    let window = match q.time_window {
        Some(days) => TimeWindow::new(days)?,
        None => state.analysis.default_window()?,
    };
    let request = CorrelationRequest {
        kind: q.kind.as_deref().unwrap_or("all").parse::<CorrelationKind>()?,
        category: q.category.filter(|c| !c.is_empty()),
        window,
        product_ids: q.product_ids.as_deref().map(parse_ids).unwrap_or_default(),
    };
    let deadline = Deadline::after(state.analysis.deadline());

    let output = tokio::task::spawn_blocking(move || {
        correlation::run(state.store.as_ref(), &state.analyzer, &request, deadline)
    })
    .await??;

    Ok(Json(output))
}

async fn model_scenarios(
    payload: Result<Json<ScenarioRequest>, JsonRejection>,
) -> Result<Json<ScenarioOutput>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(request.run()?))
}

async fn scenario_templates() -> Json<Value> {
    Json(json!({ "templates": templates::registry() }))
}
