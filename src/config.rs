//! TOML configuration for tradescope.
//!
//! Layered like every other daemon we ship: an explicit `--config` path,
//! then the `TRADESCOPE_CONFIG` environment variable, then
//! `/etc/tradescope/tradescope.toml`, then compiled-in defaults.
//! Risk weights and scenario templates are not configurable.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::TimeWindow;

pub const ENV_VAR: &str = "TRADESCOPE_CONFIG";
pub const SYSTEM_PATH: &str = "/etc/tradescope/tradescope.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try `TRADESCOPE_CONFIG`, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TRADESCOPE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// An explicit path must load; otherwise fall back through the layers.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        let window = i64::from(a.default_window_days);
        if !(TimeWindow::MIN_DAYS..=TimeWindow::MAX_DAYS).contains(&window) {
            bail!(
                "analysis.default_window_days must be between {} and {}, got {}",
                TimeWindow::MIN_DAYS,
                TimeWindow::MAX_DAYS,
                a.default_window_days
            );
        }
        if a.workers == 0 {
            bail!("analysis.workers must be at least 1");
        }
        if a.deadline_ms == 0 {
            bail!("analysis.deadline_ms must be at least 1");
        }
        if a.top_n == 0 {
            bail!("analysis.top_n must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Created on first open.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/tradescope.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Correlation window used when a request names none.
    pub default_window_days: u32,
    /// Computation deadline for HTTP requests, in milliseconds.
    pub deadline_ms: u64,
    /// Size of the correlation worker pool.
    pub workers: usize,
    /// Number of alerts listed in a risk analysis.
    pub top_n: usize,
}

impl AnalysisConfig {
    pub fn default_window(&self) -> Result<TimeWindow, CoreError> {
        TimeWindow::new(i64::from(self.default_window_days))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_window_days: TimeWindow::DEFAULT_DAYS,
            deadline_ms: 5000,
            workers: 4,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
