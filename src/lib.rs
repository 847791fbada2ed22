//! Tradescope -- risk scoring, correlation analysis and scenario modelling
//! for trade anomaly alerts.
//!
//! The analytic core (`risk`, `analysis`, `scenario`) is synchronous and
//! reads everything through [`storage::MetricStore`]; `api` serves it over
//! HTTP.

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod risk;
pub mod scenario;
pub mod storage;

use anyhow::{Context, Result};

use crate::config::AppConfig;

/// Start the API server against the configured store.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let db_path = &config.storage.db_path;
    tracing::info!(%db_path, "Initializing database");
    let store = storage::SqliteStore::open(db_path)?;

    let state = api::state::AppState::new(store, config.analysis.clone())?;
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    tracing::info!(%addr, risk_model = risk::RISK_MODEL.version, "Tradescope listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
