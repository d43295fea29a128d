//! Smoke forecast video service.
//!
//! Pulls HRRR smoke tiles from the NOAA WMTS endpoint with:
//! - Batched, rate-limit-aware bulk tile retrieval
//! - Automatic backoff and budgeted retries
//! - Per-timestep mosaic, composite, and annotation rendering
//! - Multi-codec video encoding and all-or-nothing publication

mod basemap;
mod batch;
mod config;
mod encode;
mod fetch;
mod group;
mod locate;
mod magick;
mod mosaic;
mod pipeline;
mod publish;
mod render;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::ServiceConfig;
use pipeline::RunPipeline;
use scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "forecast-video")]
#[command(about = "Fetches HRRR smoke tiles and publishes forecast videos")]
struct Args {
    /// Run once and exit (vs scheduled cadence)
    #[arg(long)]
    once: bool,

    /// Restrict the run to a single area code
    #[arg(short, long)]
    area: Option<String>,

    /// Forecast-hour offset to resume a partial run from (0-based)
    #[arg(long, default_value = "0")]
    resume_from: u32,

    /// Configuration file (YAML); built-in defaults when omitted
    #[arg(long, env = "FORECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory for frames and encoded videos
    #[arg(long, default_value = "/data/forecast-work")]
    work_dir: PathBuf,

    /// Directory for cached area base maps
    #[arg(long, default_value = "/data/area-base-maps")]
    base_map_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting smoke forecast video service");

    let config = ServiceConfig::load_or_default(args.config.as_deref())?;

    // Create directories
    tokio::fs::create_dir_all(&args.work_dir).await?;
    tokio::fs::create_dir_all(&args.base_map_dir).await?;

    let schedule = config.schedule.clone();
    let pipeline = Arc::new(RunPipeline::new(
        config,
        args.work_dir.clone(),
        args.base_map_dir.clone(),
    )?);

    if args.once {
        // Single run mode
        info!(resume_from = args.resume_from, "Running single forecast cycle");
        pipeline.execute(args.resume_from, args.area.as_deref()).await?;
    } else {
        // Continuous cadence mode
        info!("Starting scheduled operation");

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        // Handle Ctrl+C
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown_tx_clone.send(()).ok();
        });

        Scheduler::new(pipeline, schedule)
            .run_forever(shutdown_tx.subscribe())
            .await?;
    }

    Ok(())
}
