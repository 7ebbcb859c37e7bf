//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Shared primitives and utilities for the core runtime."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_tick_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_reference_point() -> ReferencePoint {
    ReferencePoint {
        latitude: 28.4595,
        longitude: 77.0266,
    }
}

fn default_spawn_radius_deg() -> f64 {
    0.05
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_websocket_enabled() -> bool {
    true
}

fn default_websocket_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_filter() -> String {
    "info".to_owned()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the telemetry daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "NF_TELEMETRY_CONFIG";

    /// Load configuration from the first existing candidate, or from
    /// `NF_TELEMETRY_CONFIG` when set, together with the path it came from.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.fleet.validate()?;
        self.broadcast.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tick_interval: Duration,
    /// Fixed seed for the tick random source; entropy-seeded when unset.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            random_seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("simulation tick_interval must be at least one second"));
        }
        Ok(())
    }
}

/// Geographic point that newly registered vehicles without coordinates are
/// scattered around.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl ReferencePoint {
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(anyhow!(
                "reference point ({}, {}) is not a valid coordinate",
                self.latitude,
                self.longitude
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_reference_point")]
    pub reference_point: ReferencePoint,
    /// Half-width in degrees of the square defaults are sampled from.
    #[serde(default = "default_spawn_radius_deg")]
    pub spawn_radius_deg: f64,
    /// Vehicles registered at startup.
    #[serde(default)]
    pub seed: Vec<SeedVehicle>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            reference_point: default_reference_point(),
            spawn_radius_deg: default_spawn_radius_deg(),
            seed: Vec::new(),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        self.reference_point.validate()?;
        if !self.spawn_radius_deg.is_finite() || self.spawn_radius_deg < 0.0 {
            return Err(anyhow!(
                "fleet spawn_radius_deg must be a non-negative number"
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for vehicle in &self.seed {
            if vehicle.id.trim().is_empty() {
                return Err(anyhow!("seed vehicles must declare a non-empty id"));
            }
            if !seen.insert(vehicle.id.as_str()) {
                return Err(anyhow!("seed vehicle '{}' declared twice", vehicle.id));
            }
        }
        Ok(())
    }
}

/// Vehicle registered by the daemon at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedVehicle {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub range: Option<u32>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Events queued per subscriber before it is considered unreachable.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_websocket_enabled")]
    pub websocket_enabled: bool,
    #[serde(default = "default_websocket_listen")]
    pub websocket_listen: SocketAddr,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            websocket_enabled: default_websocket_enabled(),
            websocket_listen: default_websocket_listen(),
        }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_buffer == 0 {
            return Err(anyhow!("broadcast subscriber_buffer must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Filter used when neither `NF_TELEMETRY_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            filter: default_log_filter(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
