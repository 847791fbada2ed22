//! HTTP API tests -- drive the router in-process against a seeded database.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use tradescope::api::{self, state::AppState};
use tradescope::config::AnalysisConfig;
use tradescope::storage::{self, Fixture, SqliteStore};

const FIXTURE: &str = include_str!("fixtures/trade.json");

fn test_app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api.db");
    let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
    let fixture: Fixture = serde_json::from_str(FIXTURE).unwrap();
    storage::import_fixture(store.pool(), &fixture).unwrap();
    let state = AppState::new(store, AnalysisConfig::default()).unwrap();
    (dir, api::router(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn test_health() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["risk_model"], "2024.1");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_dir, app) = test_app();
    let (status, _) = get(&app, "/api/v1/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_risk_scores_ranked_with_skips() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/risk-scores").await;
    assert_eq!(status, StatusCode::OK);

    // al-2 is resolved, al-3 points at a missing anomaly.
    assert_eq!(body["total"], 2);
    assert_eq!(body["risk_scores"][0]["alert_id"], "al-1");
    assert_eq!(body["risk_scores"][0]["risk_level"], "critical");
    assert_eq!(body["risk_scores"][1]["alert_id"], "al-4");
    assert_eq!(body["skipped"][0]["id"], "al-3");
    assert_eq!(body["partial"], true);
    assert_eq!(body["truncated"], false);
}

#[tokio::test]
async fn test_risk_score_filters() {
    let (_dir, app) = test_app();

    let (_, body) = get(&app, "/api/v1/risk-scores?minScore=50").await;
    assert_eq!(body["total"], 1);

    let (_, body) = get(&app, "/api/v1/risk-scores?riskLevel=low").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["risk_scores"][0]["alert_id"], "al-4");

    let (_, body) = get(&app, "/api/v1/risk-scores?includeResolved=true&limit=5").await;
    assert_eq!(body["total"], 3);

    let (status, body) = get(&app, "/api/v1/risk-scores?riskLevel=extreme").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("extreme"));

    let (status, _) = get(&app, "/api/v1/risk-scores?mode=summary").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_risk_analysis_mode() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/risk-scores?mode=analysis").await;
    assert_eq!(status, StatusCode::OK);
    let analysis = &body["analysis"];
    assert_eq!(analysis["model_version"], "2024.1");
    assert_eq!(analysis["total"], 2);
    assert_eq!(analysis["distribution"]["critical"], 1);
    assert_eq!(analysis["distribution"]["low"], 1);
    assert_eq!(analysis["distribution"]["medium"], 0);
    assert_eq!(analysis["top_risks"][0]["alert_id"], "al-1");
}

#[tokio::test]
async fn test_update_risk_scores_is_idempotent() {
    let (_dir, app) = test_app();
    let (status, first) = post_json(&app, "/api/v1/risk-scores", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["updated"], 3);
    assert_eq!(first["considered"], 3);

    let (_, second) = post_json(&app, "/api/v1/risk-scores", Value::Null).await;
    assert_eq!(second["updated"], 0);
    assert_eq!(second["considered"], 3);
}

#[tokio::test]
async fn test_correlation_all_in_category() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/correlation?category=metals&timeWindow=30").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "all");
    assert_eq!(body["window_days"], 30);
    let pairs = body["correlations"].as_array().unwrap();
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0]["series_a"], "copper");
    assert_eq!(pairs[0]["series_b"], "wire");
    assert_eq!(pairs[0]["strength"], "very_strong");
    assert_eq!(pairs[2]["coefficient"], Value::Null);
    assert_eq!(pairs[2]["reason"], "zero_variance");
}

#[tokio::test]
async fn test_correlation_window_bounds() {
    let (_dir, app) = test_app();
    let (status, _) = get(&app, "/api/v1/correlation?timeWindow=3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/api/v1/correlation?timeWindow=400").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = get(&app, "/api/v1/correlation").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["window_days"], 90);
}

#[tokio::test]
async fn test_correlation_matrix() {
    let (_dir, app) = test_app();

    let (status, _) = get(&app, "/api/v1/correlation?type=matrix&productIds=copper").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/v1/correlation?type=matrix&productIds=copper,copper").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/v1/correlation?type=matrix&productIds=copper,nickel").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(&app, "/api/v1/correlation?type=matrix&productIds=copper,ingot,wheat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "matrix");
    let cells = &body["matrix"]["cells"];
    for i in 0..3 {
        assert_eq!(cells[i][i], json!(1.0));
        for j in 0..3 {
            assert_eq!(cells[i][j], cells[j][i]);
        }
    }
    // ingot never moves.
    assert_eq!(cells[0][1], Value::Null);
}

#[tokio::test]
async fn test_correlation_sectors() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/correlation?type=sector").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "sector");
    assert_eq!(body["sectors"].as_array().unwrap().len(), 2);
    assert_eq!(body["correlations"].as_array().unwrap().len(), 1);

    let (status, _) = get(&app, "/api/v1/correlation?type=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scenario_explicit() {
    let (_dir, app) = test_app();
    let request = json!({
        "base_data": { "unit_price": 100.0, "tariff_rate": 0.10, "fx_rate": 1.0, "freight_cost": 5.0 },
        "scenarios": [{
            "name": "tariff_plus_5",
            "deltas": { "tariff_rate": { "kind": "absolute", "value": 0.05 } }
        }]
    });
    let (status, body) = post_json(&app, "/api/v1/scenario", request).await;
    assert_eq!(status, StatusCode::OK);
    let baseline = body["baseline"]["metrics"]["landed_cost"].as_f64().unwrap();
    assert!((baseline - 115.0).abs() < 1e-9);
    let r = &body["results"][0];
    assert!((r["metrics"]["landed_cost"].as_f64().unwrap() - 120.0).abs() < 1e-9);
    assert_eq!(r["impact_level"], "negligible");
    assert_eq!(body["partial"], false);
}

#[tokio::test]
async fn test_scenario_template_and_errors() {
    let (_dir, app) = test_app();
    let base = json!({ "unit_price": 50.0, "tariff_rate": 0.05, "fx_rate": 1.2, "freight_cost": 3.0 });

    let (status, body) =
        post_json(&app, "/api/v1/scenario", json!({ "base_data": base, "template": "tariff_increase" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 3);

    let (status, body) =
        post_json(&app, "/api/v1/scenario", json!({ "base_data": base, "template": "alien_invasion" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("alien_invasion"));

    let (status, _) = post_json(
        &app,
        "/api/v1/scenario",
        json!({ "base_data": base, "template": "fx_shock", "scenarios": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let zero = json!({ "unit_price": 0.0 });
    let (status, body) =
        post_json(&app, "/api/v1/scenario", json!({ "base_data": zero, "template": "fx_shock" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["partial"], true);
    assert_eq!(body["failures"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_scenario_body_is_400_json() {
    let (_dir, app) = test_app();

    let untagged = json!({
        "base_data": { "unit_price": 100.0 },
        "scenarios": [{ "name": "x", "deltas": { "tariff_rate": 0.05 } }]
    });
    let (status, body) = post_json(&app, "/api/v1/scenario", untagged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("deltas"));

    let unknown_field = json!({ "base_data": { "unit_price": 100.0, "colour": "red" }, "template": "fx_shock" });
    let (status, body) = post_json(&app, "/api/v1/scenario", unknown_field).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_malformed_query_is_400_json() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/correlation?timeWindow=ninety").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = get(&app, "/api/v1/risk-scores?minScore=high").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_scenario_templates_listing() {
    let (_dir, app) = test_app();
    let (status, body) = get(&app, "/api/v1/scenario/templates").await;
    assert_eq!(status, StatusCode::OK);
    let templates = body["templates"].as_object().unwrap();
    for key in ["fx_shock", "tariff_increase", "supply_disruption", "trade_war", "cost_relief"] {
        assert!(templates.contains_key(key), "missing {key}");
    }
}
