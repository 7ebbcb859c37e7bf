//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Shared primitives and utilities for the core runtime."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! Core shared primitives for the NF-Telemetry workspace.
//! This crate exposes configuration loading, tracing setup, and loop timing
//! utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AppConfig, BroadcastConfig, FleetConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    ReferencePoint, SeedVehicle, SimulationConfig,
};
pub use logging::{filter_directive, init_tracing, LogFormat, LOG_ENV};
pub use metrics::{JitterHistogram, JitterSummary, LoopTimingReporter};
