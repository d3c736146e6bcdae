//! pulse-chain - live seismic pulse pipeline
//!
//! Runs the configured chain (by default a synthetic feed, packet stacking,
//! mean removal, an STA/LTA picker and an in-memory catalog) on a real-time
//! tick until Ctrl+C or the tick limit.
//!
//! # Usage
//!
//! ```bash
//! # Run the built-in chain for 300 ticks
//! cargo run --release -- --ticks 300
//!
//! # Use a config file, run pulses on the rayon pool, print reports as JSON lines
//! ./pulse-chain --config pulse_chain.toml --parallel --json-reports
//!
//! # Write the effective configuration and exit
//! ./pulse-chain --dump-config > pulse_chain.toml
//! ```
//!
//! # Environment Variables
//!
//! - `PULSE_CHAIN_CONFIG`: Path to the pipeline config (default: `./pulse_chain.toml`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use pulse_chain::config::{PipelineConfig, QuotaPolicyKind};
use pulse_chain::controller::stop::{self, StopFn};
use pulse_chain::controller::{ExecutionMode, JsonLinesSink, TracingReportSink};
use pulse_chain::driver::{controller_from_config, PulseDriver};
use pulse_chain::seismic::assemble;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "pulse-chain")]
#[command(about = "Bounded-latency pulse pipeline for live seismic waveforms")]
#[command(version)]
struct CliArgs {
    /// Pipeline config file (overrides PULSE_CHAIN_CONFIG and ./pulse_chain.toml)
    #[arg(short, long, value_name = "PATH", env = "PULSE_CHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many ticks (overrides controller.max_ticks)
    #[arg(long)]
    ticks: Option<u64>,

    /// Tick period in milliseconds (overrides controller.tick_interval_ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Pulse independent modules concurrently on the rayon pool
    #[arg(long)]
    parallel: bool,

    /// Boost quotas of modules with a backlog
    #[arg(long)]
    adaptive: bool,

    /// Seed for the synthetic feed (overrides seismic.seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Print every pulse report to stdout as one JSON object per line
    #[arg(long)]
    json_reports: bool,

    /// Emit logs as JSON instead of human-readable text
    #[arg(long)]
    log_json: bool,

    /// Stop at the first module failure
    #[arg(long)]
    stop_on_fatal: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::load(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration after CLI overrides")?;

    if args.dump_config {
        print!("{}", config.to_toml().context("Failed to serialize config")?);
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  pulse-chain - live seismic pulse pipeline");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "   Modules: {} | Tick: {}ms | Mode: {} | Quotas: {:?}",
        config.modules.len(),
        config.controller.tick_interval_ms,
        config.controller.mode,
        config.controller.quota_policy
    );

    let assembly = assemble(&config).context("Failed to assemble pipeline")?;
    let catalogs = assembly.catalogs.clone();

    let mut controller = controller_from_config(assembly.sequence, &config.controller)
        .with_sink(TracingReportSink);
    if args.json_reports {
        controller.add_sink(Box::new(JsonLinesSink::stdout()));
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut stops: Vec<StopFn> = Vec::new();
    if let Some(limit) = config.controller.max_ticks {
        stops.push(Box::new(stop::after_ticks(limit)));
    }
    if args.stop_on_fatal {
        stops.push(Box::new(stop::on_fatal()));
    }

    let mut driver = PulseDriver::new(controller, config.controller.tick_interval())
        .with_cancellation(cancel_token);
    let summary = driver.run(stop::any_of(stops)).await;

    let mut names: Vec<&String> = catalogs.keys().collect();
    names.sort();
    for name in names {
        let handle = &catalogs[name];
        info!(
            catalog = %name,
            picks = handle.pick_count(),
            traces = handle.trace_count(),
            "Catalog contents"
        );
    }
    if !summary.degraded.is_empty() {
        warn!(modules = %summary.degraded.join(", "), "Run ended with degraded modules");
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn apply_overrides(config: &mut PipelineConfig, args: &CliArgs) {
    if let Some(ticks) = args.ticks {
        config.controller.max_ticks = Some(ticks);
    }
    if let Some(ms) = args.interval_ms {
        config.controller.tick_interval_ms = ms;
    }
    if args.parallel {
        config.controller.mode = ExecutionMode::Parallel;
    }
    if args.adaptive {
        config.controller.quota_policy = QuotaPolicyKind::Adaptive;
    }
    if args.seed.is_some() {
        config.seismic.seed = args.seed;
    }
}
