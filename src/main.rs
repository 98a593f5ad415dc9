use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use uidai_pipeline::config::Config;
use uidai_pipeline::constants::DEFAULT_LOG_DIR;
use uidai_pipeline::logging;
use uidai_pipeline::observability;
use uidai_pipeline::pipeline::processing::alerts::{compute_aflb_alerts, compute_urrdf_alerts};
use uidai_pipeline::pipeline::storage::write_json;
use uidai_pipeline::pipeline::{Pipeline, PipelineOutput};

#[derive(Parser)]
#[command(name = "uidai_pipeline")]
#[command(about = "Merge UIDAI enrolment, demographic and biometric dumps and score regional integrity")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML configuration file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of enrolment CSV fragments
    #[arg(long, global = true)]
    enrol_dir: Option<PathBuf>,

    /// Directory of demographic-update CSV fragments
    #[arg(long, global = true)]
    demo_dir: Option<PathBuf>,

    /// Directory of biometric-update CSV fragments
    #[arg(long, global = true)]
    bio_dir: Option<PathBuf>,

    /// Output CSV path
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Write Prometheus text metrics here when the run ends
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    /// Load and clean the three datasets concurrently
    #[arg(long, global = true)]
    parallel: bool,

    /// Suppress console logging (the JSON log file is still written)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, clean and merge the datasets without metric columns
    Merge,
    /// Merge and append BCG, BUR, FAFI, FAFI_rate, BIS and risk tier
    Score {
        /// Also write per-district scores to this CSV
        #[arg(long)]
        district_scores: Option<PathBuf>,
    },
    /// Compute month-over-month alerts from the merged data
    Alerts {
        #[arg(long, value_enum)]
        model: AlertModel,
        /// Target month as YYYY-MM (defaults to the latest month in the data)
        #[arg(long)]
        month: Option<String>,
        /// Number of alerts to return
        #[arg(long)]
        top: Option<usize>,
        /// Write the JSON response here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AlertModel {
    /// Facility load balancing, per pincode
    Aflb,
    /// Adult inflow forecast, per district
    Urrdf,
}

impl AlertModel {
    fn default_top(&self) -> usize {
        match self {
            AlertModel::Aflb => 20,
            AlertModel::Urrdf => 10,
        }
    }
}

fn build_config(common: &CommonArgs) -> Result<Config> {
    let mut config = match &common.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(dir) = &common.enrol_dir {
        config.inputs.enrolment_dir = dir.clone();
    }
    if let Some(dir) = &common.demo_dir {
        config.inputs.demographic_dir = dir.clone();
    }
    if let Some(dir) = &common.bio_dir {
        config.inputs.biometric_dir = dir.clone();
    }
    if let Some(path) = &common.output {
        config.output.path = path.clone();
    }
    if common.parallel {
        config.execution.parallel_clean = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn validate_month(month: &str) -> Result<()> {
    if month.len() != 7 || NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").is_err() {
        bail!("Invalid --month '{}', expected YYYY-MM", month);
    }
    Ok(())
}

fn run_command(command: &Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Merge => {
            config.scoring.enabled = false;
            let result = Pipeline::run(&config).context("Merge run failed")?;
            println!("{}", result.written.describe("merged dataset"));
        }
        Commands::Score { district_scores } => {
            config.scoring.enabled = true;
            if let Some(path) = district_scores {
                config.output.district_scores_path = Some(path.clone());
            }
            let result = Pipeline::run(&config).context("Scoring run failed")?;
            println!("{}", result.written.describe("scored dataset"));
            if let Some(summary) = &result.district_written {
                println!("{}", summary.describe("district scores"));
            }
            if let PipelineOutput::Scored { table, .. } = &result.output {
                for (tier, count) in table.tier_counts() {
                    println!("   {}: {}", tier, count);
                }
            }
        }
        Commands::Alerts {
            model,
            month,
            top,
            out,
        } => {
            if let Some(month) = month {
                validate_month(month)?;
            }
            let top_n = top.unwrap_or_else(|| model.default_top());
            let merged = Pipeline::build_merged(&config).context("Failed to build merged table")?;

            let json = match model {
                AlertModel::Aflb => {
                    let response = compute_aflb_alerts(&merged, month.as_deref(), top_n)?;
                    write_alerts(&response, out.as_deref())?
                }
                AlertModel::Urrdf => {
                    let response = compute_urrdf_alerts(&merged, month.as_deref(), top_n)?;
                    write_alerts(&response, out.as_deref())?
                }
            };
            if let Some(json) = json {
                println!("{}", json);
            }
        }
    }
    Ok(())
}

/// Write the response to `out`, or hand back the JSON for stdout
fn write_alerts<T: serde::Serialize>(response: &T, out: Option<&Path>) -> Result<Option<String>> {
    match out {
        Some(path) => {
            write_json(response, path)
                .with_context(|| format!("Failed to write alerts to {}", path.display()))?;
            println!("Wrote alerts to {}", path.display());
            Ok(None)
        }
        None => Ok(Some(serde_json::to_string_pretty(response)?)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Held until exit so the file writer flushes
    let _guard = logging::init_logging(&cli.common.log_dir, !cli.common.quiet);

    if let Err(e) = observability::init() {
        error!("Metrics disabled: {}", e);
    }

    let outcome = build_config(&cli.common).and_then(|config| run_command(&cli.command, config));
    if let Err(e) = &outcome {
        error!("❌ Run failed: {:#}", e);
    }

    if let Some(path) = &cli.common.metrics_out {
        if let Some(text) = observability::render() {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
            info!("📈 Metrics written to {}", path.display());
        }
    }

    outcome
}
