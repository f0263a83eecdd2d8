//! Egoclip command line
//!
//! ```text
//! egoclip convert [--config PATH] [--max-videos N]
//! egoclip validate DATASET_PATH
//! ```
//!
//! Configuration is loaded from the YAML file given with `--config`, then
//! `CURATOR_`-prefixed environment variables (e.g. `CURATOR_DATA__MAX_VIDEOS`),
//! then command-line overrides.

use anyhow::Context;
use clap::{Parser, Subcommand};
use egoclip_curator::config::{CuratorConfig, LoggingConfig};
use egoclip_curator::pipeline::Pipeline;
use egoclip_curator::validate::validate_dataset;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "egoclip",
    version,
    about = "Curate egocentric recordings into quality-filtered training clips"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample videos, cut clips, filter them and write the curated dataset
    Convert {
        /// Run configuration file
        #[arg(long, default_value = "config/default.yaml")]
        config: PathBuf,

        /// Override data.max_videos
        #[arg(long)]
        max_videos: Option<u32>,
    },

    /// Check a produced dataset directory for a sane metadata file
    Validate {
        /// Dataset root directory
        dataset_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Convert { config, max_videos } => convert(config, max_videos).await,
        Commands::Validate { dataset_path } => validate(dataset_path),
    }
}

async fn convert(config_path: PathBuf, max_videos: Option<u32>) -> anyhow::Result<()> {
    let config = CuratorConfig::load(&config_path, max_videos)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    init_logging(&config.logging)?;

    info!(
        service = "egoclip-curator",
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting conversion"
    );

    let pipeline = Pipeline::from_config(config)?;
    let summary = match pipeline.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Conversion failed");
            return Err(e.into());
        }
    };

    println!("Videos sampled:  {}", summary.videos_sampled);
    println!("Clips extracted: {}", summary.clips_extracted);
    println!("Clips retained:  {}", summary.clips_retained);
    println!("Manifest:        {}", summary.manifest_path.display());
    Ok(())
}

fn validate(dataset_path: PathBuf) -> anyhow::Result<()> {
    init_logging(&LoggingConfig::default())?;

    let report = validate_dataset(&dataset_path)
        .with_context(|| format!("{} is not a valid dataset", dataset_path.display()))?;
    println!("{}", report);
    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = log_filter(level, std::env::var("RUST_LOG").ok())?;
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// `RUST_LOG` directives when set, otherwise the configured level for this
/// crate with noisy HTTP internals held at `warn`.
fn log_filter(level: Level, rust_log: Option<String>) -> anyhow::Result<EnvFilter> {
    match rust_log.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => Ok(EnvFilter::try_new(directives)?),
        None => Ok(EnvFilter::try_new(format!(
            "egoclip_curator={level},egoclip={level},reqwest=warn,hyper=warn"
        ))?),
    }
}
