//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "binary"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Binary entrypoint for the fleet telemetry daemon."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nf_common::config::AppConfig;
use nf_common::logging::init_tracing;
use nf_logging::{log_system_event, SystemEventOutcome};
use nf_metrics::{new_registry, spawn_http_server, DaemonMetrics, TelemetryMetrics};
use nf_net::{WebSocketServerBuilder, WebSocketServerHandle};
use nf_telemetry::{Broadcaster, FleetTelemetry, SimulationScheduler, TelemetryStore};
use tokio::signal;
use tracing::{info, warn};

const SERVICE_NAME: &str = "nf-telemetryd";
const DEFAULT_CONFIG_PATH: &str = "configs/nf-telemetryd.toml";
const JITTER_REPORT_FILE: &str = "tick-jitter.json";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("nf-telemetryd ", env!("CARGO_PKG_VERSION")),
    about = "Fleet telemetry simulation and broadcast daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Override the simulation tick interval"
    )]
    tick_seconds: Option<u64>,

    #[arg(long, help = "Do not start the WebSocket endpoint")]
    no_websocket: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulation and broadcast services")]
    Run,
    #[command(about = "Load and validate configuration, print it, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_PATH));

    let load_started = Instant::now();
    let (mut config, config_source) = load_config(&candidates)?;
    let load_duration = load_started.elapsed();

    if let Some(seconds) = cli.tick_seconds {
        config.simulation.tick_interval = Duration::from_secs(seconds);
    }
    if cli.no_websocket {
        config.broadcast.websocket_enabled = false;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, config_source, load_duration).await,
        Commands::CheckConfig => {
            let source = config_source
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "built-in defaults".to_owned());
            println!("# source: {source}");
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("failed to render configuration")?
            );
            Ok(())
        }
    }
}

/// Load from the first existing candidate (or `NF_TELEMETRY_CONFIG`); fall
/// back to built-in defaults when neither is present.
fn load_config(candidates: &[PathBuf]) -> Result<(AppConfig, Option<PathBuf>)> {
    let env_override = std::env::var(AppConfig::ENV_CONFIG_PATH)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if env_override || candidates.iter().any(|path| path.exists()) {
        let loaded = AppConfig::load_with_source(candidates)?;
        Ok((loaded.config, Some(loaded.source)))
    } else {
        Ok((AppConfig::default(), None))
    }
}

async fn run_daemon(
    config: AppConfig,
    config_source: Option<PathBuf>,
    load_duration: Duration,
) -> Result<()> {
    if !init_tracing(SERVICE_NAME, &config.logging)? {
        warn!("a tracing subscriber was already installed; keeping it");
    }
    match &config_source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => warn!(
            "no configuration file found; running with built-in defaults"
        ),
    }

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"));
    let telemetry_metrics = TelemetryMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store = Arc::new(match config.simulation.random_seed {
        Some(seed) => TelemetryStore::with_seed(
            config.fleet.reference_point,
            config.fleet.spawn_radius_deg,
            seed,
        ),
        None => TelemetryStore::from_config(&config.fleet),
    });
    let fleet = FleetTelemetry::new(store.clone());
    let seeded = fleet.seed_from_config(&config.fleet);
    telemetry_metrics.set_vehicle_count(store.len());

    let broadcaster = Arc::new(
        Broadcaster::new(config.broadcast.subscriber_buffer).with_metrics(telemetry_metrics.clone()),
    );
    let scheduler = SimulationScheduler::new(store.clone(), broadcaster.clone(), &config.simulation)
        .with_metrics(telemetry_metrics);
    let scheduler = scheduler.spawn();

    let websocket: Option<WebSocketServerHandle> = if config.broadcast.websocket_enabled {
        let server =
            WebSocketServerBuilder::new(config.broadcast.websocket_listen, broadcaster.clone())
                .spawn()
                .await?;
        info!(address = %server.local_addr(), "websocket endpoint ready");
        Some(server)
    } else {
        info!("websocket endpoint disabled");
        None
    };

    log_system_event(
        None,
        "daemon_start",
        &format!(
            "tracking {} vehicles ({} seeded); ticking every {:?}",
            store.len(),
            seeded,
            config.simulation.tick_interval
        ),
        SystemEventOutcome::Success,
    );

    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = websocket {
        server.shutdown().await?;
    }
    let timing = scheduler.timing();
    scheduler.shutdown().await?;
    write_jitter_report(&config.logging.directory, &timing);

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    let stats = broadcaster.stats();
    log_system_event(
        None,
        "daemon_stop",
        &format!(
            "published {} events, {} deliveries, {} subscribers dropped",
            stats.published, stats.delivered, stats.dropped
        ),
        if stats.dropped == 0 {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Degraded
        },
    );
    Ok(())
}

fn write_jitter_report(directory: &Path, timing: &nf_common::LoopTimingReporter) {
    let path = directory.join(JITTER_REPORT_FILE);
    match timing.histogram().write_json(&path) {
        Ok(()) => info!(path = %path.display(), "tick jitter summary written"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to write tick jitter summary"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_overrides_and_subcommands() {
        let cli = Cli::try_parse_from([
            "nf-telemetryd",
            "--config",
            "custom.toml",
            "--tick-seconds",
            "2",
            "--no-websocket",
            "check-config",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.tick_seconds, Some(2));
        assert!(cli.no_websocket);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }

    #[test]
    fn zero_tick_override_is_rejected() {
        assert!(Cli::try_parse_from(["nf-telemetryd", "--tick-seconds", "0"]).is_err());
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        if std::env::var(AppConfig::ENV_CONFIG_PATH).is_ok() {
            return;
        }
        let (config, source) =
            load_config(&[PathBuf::from("definitely/not/here.toml")]).unwrap();
        assert!(source.is_none());
        assert_eq!(config.simulation.tick_interval, Duration::from_secs(5));
    }
}
