//! ---
//! nf_section: "03-logging-metrics"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Metrics collection and export utilities."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    match TextEncoder::new().encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: IntGaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "nf_telemetryd_starts_total",
            "Total number of times the telemetry daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "nf_telemetryd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = IntGaugeVec::new(
            Opts::new(
                "nf_telemetryd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1);
    }
}

/// Counters and gauges describing the simulation loop and the fan-out.
#[derive(Clone, Debug)]
pub struct TelemetryMetrics {
    vehicles: IntGauge,
    ticks_total: IntCounter,
    tick_seconds: Histogram,
    records_skipped: IntCounter,
    events_published: IntCounter,
    serialization_failures: IntCounter,
    subscribers: IntGauge,
    subscribers_dropped: IntCounterVec,
}

impl TelemetryMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let vehicles = IntGauge::with_opts(Opts::new(
            "nf_vehicles_tracked",
            "Number of vehicles currently held in the telemetry store",
        ))?;
        registry.register(Box::new(vehicles.clone()))?;

        let ticks_total = IntCounter::with_opts(Opts::new(
            "nf_simulation_ticks_total",
            "Completed simulation ticks",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let tick_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "nf_simulation_tick_seconds",
                "Wall-clock time spent advancing and publishing one tick",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        let records_skipped = IntCounter::with_opts(Opts::new(
            "nf_simulation_records_skipped_total",
            "Records left untouched by a tick because their stored state was malformed",
        ))?;
        registry.register(Box::new(records_skipped.clone()))?;

        let events_published = IntCounter::with_opts(Opts::new(
            "nf_broadcast_events_published_total",
            "Vehicle update events handed to the broadcaster",
        ))?;
        registry.register(Box::new(events_published.clone()))?;

        let serialization_failures = IntCounter::with_opts(Opts::new(
            "nf_broadcast_serialization_failures_total",
            "Vehicle update events that could not be encoded",
        ))?;
        registry.register(Box::new(serialization_failures.clone()))?;

        let subscribers = IntGauge::with_opts(Opts::new(
            "nf_broadcast_subscribers",
            "Live subscribers registered with the broadcaster",
        ))?;
        registry.register(Box::new(subscribers.clone()))?;

        let subscribers_dropped = IntCounterVec::new(
            Opts::new(
                "nf_broadcast_subscribers_dropped_total",
                "Subscribers unregistered after a failed send, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(subscribers_dropped.clone()))?;

        Ok(Self {
            vehicles,
            ticks_total,
            tick_seconds,
            records_skipped,
            events_published,
            serialization_failures,
            subscribers,
            subscribers_dropped,
        })
    }

    pub fn set_vehicle_count(&self, count: usize) {
        self.vehicles.set(count as i64);
    }

    pub fn observe_tick(&self, seconds: f64) {
        self.ticks_total.inc();
        self.tick_seconds.observe(seconds);
    }

    pub fn add_records_skipped(&self, count: u64) {
        self.records_skipped.inc_by(count);
    }

    pub fn add_events_published(&self, count: u64) {
        self.events_published.inc_by(count);
    }

    pub fn add_serialization_failures(&self, count: u64) {
        self.serialization_failures.inc_by(count);
    }

    pub fn set_subscriber_count(&self, count: usize) {
        self.subscribers.set(count as i64);
    }

    pub fn record_subscriber_dropped(&self, reason: &str) {
        self.subscribers_dropped.with_label_values(&[reason]).inc();
    }
}

pub use prometheus;
