use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tradescope::analysis::service::{self as correlation, parse_ids};
use tradescope::analysis::{CorrelationAnalyzer, CorrelationKind, CorrelationOutput, CorrelationRequest};
use tradescope::config::AppConfig;
use tradescope::model::{Deadline, TimeWindow};
use tradescope::risk::{RiskFilter, RiskLevel, RiskService, ScoringPolicy};
use tradescope::scenario::{templates, BaseData, ScenarioDefinition, ScenarioRequest};
use tradescope::storage::{self, SqliteStore};

#[derive(Parser)]
#[command(
    name = "tradescope",
    about = "Risk scoring, correlation analysis and scenario modelling for trade anomalies",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $TRADESCOPE_CONFIG, then /etc/tradescope/tradescope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Score alerts, or persist the scores with --update
    RiskScores {
        /// Recompute and store risk fields for every alert
        #[arg(long)]
        update: bool,

        /// Minimum composite score
        #[arg(long)]
        min_score: Option<f64>,

        /// Only this level: low, medium, high or critical
        #[arg(long)]
        risk_level: Option<String>,

        /// Maximum number of alerts listed
        #[arg(long)]
        limit: Option<usize>,

        /// Print the aggregate analysis instead of per-alert scores
        #[arg(long)]
        analysis: bool,

        /// Include resolved alerts
        #[arg(long)]
        include_resolved: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Pairwise price correlations
    Correlate {
        /// Restrict to one product category
        #[arg(long)]
        category: Option<String>,

        /// Trailing window in days (7-365)
        #[arg(long)]
        window: Option<i64>,

        /// Correlate sector composites instead of products
        #[arg(long, conflicts_with = "products")]
        sector: bool,

        /// Comma-separated product ids for a correlation matrix
        #[arg(long)]
        products: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Model what-if scenarios against a base data file
    Scenario {
        /// JSON file with base_data fields
        #[arg(long)]
        base: PathBuf,

        /// JSON file with a list of scenario definitions
        #[arg(long, conflicts_with = "template", required_unless_present = "template")]
        scenarios: Option<PathBuf>,

        /// Built-in template key (see `tradescope templates`)
        #[arg(long)]
        template: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List built-in scenario templates
    Templates,

    /// Load series, observations, anomalies and alerts from a JSON fixture
    Import {
        /// Fixture file
        file: PathBuf,
    },
}

/// Resolve the config under a stderr subscriber so load and fallback
/// messages are not lost before `init_tracing` runs.
fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || AppConfig::resolve(explicit))
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_coefficient(r: Option<f64>) -> String {
    r.map(|r| format!("{r:+.3}")).unwrap_or_else(|| "null".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting tradescope server");
            tradescope::serve(&config).await?;
        }
        Commands::RiskScores {
            update,
            min_score,
            risk_level,
            limit,
            analysis,
            include_resolved,
            json,
        } => {
            let store = SqliteStore::open(&config.storage.db_path)?;
            let service = RiskService::new(&store);
            let policy = if include_resolved {
                ScoringPolicy::All
            } else {
                ScoringPolicy::ActiveOnly
            };

            if update {
                let summary = service.update_alert_risk_scores()?;
                if json {
                    print_json(&summary)?;
                } else {
                    println!(
                        "Risk scores updated for {} of {} alerts ({} skipped).",
                        summary.updated,
                        summary.considered,
                        summary.skipped.len()
                    );
                }
            } else if analysis {
                let report = service.risk_analysis(policy, config.analysis.top_n, Deadline::none())?;
                if json {
                    print_json(&report)?;
                } else {
                    println!("\nRisk Analysis (model {})", report.model_version);
                    println!("Alerts scored: {}", report.total);
                    let d = &report.distribution;
                    println!(
                        "Low {} | Medium {} | High {} | Critical {}",
                        d.low, d.medium, d.high, d.critical
                    );
                    if let (Some(mean), Some(median)) = (report.mean_score, report.median_score) {
                        println!("Mean {mean:.1} | Median {median:.1}");
                    }
                    println!("\nTop risks:");
                    for s in &report.top_risks {
                        println!(
                            " - {:<12} {:<14} {:>6.1} {}",
                            s.alert_id, s.product_id, s.composite_risk_score, s.risk_level
                        );
                    }
                    if !report.skipped.is_empty() {
                        println!("\nSkipped {} alert(s).", report.skipped.len());
                    }
                }
            } else {
                let filter = RiskFilter {
                    min_score,
                    risk_level: risk_level.as_deref().map(|s| s.parse::<RiskLevel>()).transpose()?,
                    limit,
                };
                let batch = service.calculate_risk_scores(policy, Deadline::none())?;
                let scores = filter.apply(batch.items);
                if json {
                    print_json(&serde_json::json!({
                        "risk_scores": scores,
                        "total": scores.len(),
                        "partial": batch.partial,
                        "skipped": batch.skipped,
                    }))?;
                } else {
                    println!("{:<12} | {:<14} | {:<14} | {:>6} | Level", "Alert", "Product", "Type", "Score");
                    println!("{:-<12}-|-{:-<14}-|-{:-<14}-|-{:-<6}-|-{:-<8}", "", "", "", "", "");
                    for s in &scores {
                        let mark = if s.partial { "*" } else { "" };
                        println!(
                            "{:<12} | {:<14} | {:<14} | {:>6.1} | {}{}",
                            s.alert_id,
                            s.product_id,
                            s.anomaly_type.as_str(),
                            s.composite_risk_score,
                            s.risk_level,
                            mark
                        );
                    }
                    for skip in &batch.skipped {
                        println!("skipped {}: {}", skip.id, skip.reason);
                    }
                }
            }
        }
        Commands::Correlate {
            category,
            window,
            sector,
            products,
            json,
        } => {
            let store = SqliteStore::open(&config.storage.db_path)?;
            let analyzer = CorrelationAnalyzer::new(config.analysis.workers)?;
            let window = match window {
                Some(days) => TimeWindow::new(days)?,
                None => config.analysis.default_window()?,
            };
            let kind = match (&products, sector) {
                (Some(_), _) => CorrelationKind::Matrix,
                (None, true) => CorrelationKind::Sector,
                (None, false) => CorrelationKind::All,
            };
            let request = CorrelationRequest {
                kind,
                category,
                window,
                product_ids: products.as_deref().map(parse_ids).unwrap_or_default(),
            };
            let output = correlation::run(&store, &analyzer, &request, Deadline::none())?;

            if json {
                print_json(&output)?;
            } else {
                match &output {
                    CorrelationOutput::All(report) => {
                        println!("Correlations over {} ({} to {})", window, report.range.start, report.range.end);
                        for c in &report.correlations {
                            println!(
                                "{:<14} ~ {:<14} {:>7} n={:<4} {}",
                                c.series_a,
                                c.series_b,
                                fmt_coefficient(c.coefficient),
                                c.n,
                                c.strength.map(|s| format!("{s:?}")).unwrap_or_default()
                            );
                        }
                    }
                    CorrelationOutput::Sector(report) => {
                        for s in &report.sectors {
                            println!("{:<16} {} products, {} points", s.sector, s.constituents.len(), s.points);
                        }
                        for c in &report.correlations {
                            println!("{:<16} ~ {:<16} {:>7}", c.series_a, c.series_b, fmt_coefficient(c.coefficient));
                        }
                    }
                    CorrelationOutput::Matrix { matrix, .. } => {
                        print!("{:<14}", "");
                        for id in &matrix.ids {
                            print!(" {:>10}", id);
                        }
                        println!();
                        for (id, row) in matrix.ids.iter().zip(&matrix.cells) {
                            print!("{:<14}", id);
                            for cell in row {
                                print!(" {:>10}", fmt_coefficient(*cell));
                            }
                            println!();
                        }
                    }
                }
            }
        }
        Commands::Scenario {
            base,
            scenarios,
            template,
            json,
        } => {
            let base_data: BaseData = read_json(&base)?;
            let scenarios: Option<Vec<ScenarioDefinition>> =
                scenarios.as_deref().map(read_json::<Vec<ScenarioDefinition>>).transpose()?;
            let request = ScenarioRequest {
                base_data,
                scenarios,
                template,
            };
            let output = request.run()?;

            if json {
                print_json(&output)?;
            } else {
                println!("Baseline landed cost: {:.4}", output.baseline.metrics.landed_cost);
                println!("{:<24} | {:>12} | {:>10} | {:>8} | Impact", "Scenario", "Landed", "Delta", "Delta %");
                println!("{:-<24}-|-{:-<12}-|-{:-<10}-|-{:-<8}-|-{:-<10}", "", "", "", "", "");
                for r in &output.results {
                    println!(
                        "{:<24} | {:>12.4} | {:>+10.4} | {:>+7.2}% | {:?}",
                        r.name, r.metrics.landed_cost, r.delta_absolute, r.delta_percent, r.impact_level
                    );
                }
                for f in &output.failures {
                    println!("{:<24} | failed: {}", f.name, f.error);
                }
            }
        }
        Commands::Templates => {
            for (key, scenarios) in templates::registry() {
                println!("{key}");
                for s in scenarios {
                    println!("  {:<24} {}", s.name, s.description.as_deref().unwrap_or(""));
                }
            }
        }
        Commands::Import { file } => {
            let fixture: storage::Fixture = read_json(&file)?;
            let pool = storage::open_pool(&config.storage.db_path)?;
            let summary = storage::import_fixture(&pool, &fixture)?;
            println!(
                "Imported {} series, {} observations, {} anomalies, {} alerts.",
                summary.series, summary.observations, summary.anomalies, summary.alerts
            );
        }
    }

    Ok(())
}
