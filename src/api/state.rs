use std::sync::Arc;

use crate::analysis::CorrelationAnalyzer;
use crate::config::AnalysisConfig;
use crate::storage::SqliteStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub analyzer: CorrelationAnalyzer,
    pub analysis: Arc<AnalysisConfig>,
}

impl AppState {
    pub fn new(store: SqliteStore, analysis: AnalysisConfig) -> anyhow::Result<Self> {
        Ok(Self {
            analyzer: CorrelationAnalyzer::new(analysis.workers)?,
            store: Arc::new(store),
            analysis: Arc::new(analysis),
        })
    }
}
