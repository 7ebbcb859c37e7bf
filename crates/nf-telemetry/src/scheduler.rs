//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Periodic simulation loop that advances and publishes the fleet."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nf_common::config::SimulationConfig;
use nf_common::time::{duration_to_micros, tick_lag_us};
use nf_common::LoopTimingReporter;
use nf_logging::{fleet_debug, fleet_warn, log_system_event, LogContext, SystemEventOutcome};
use nf_metrics::TelemetryMetrics;
use nf_rt::RateLimiter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::TelemetrySink;
use crate::error::TelemetryError;
use crate::record::{FleetEvent, TelemetryRecord};
use crate::simulation::advance;
use crate::store::TelemetryStore;

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Records whose state was advanced and committed.
    pub advanced: usize,
    /// Records left untouched because their stored state was malformed.
    pub skipped: usize,
    /// Events handed to the sink.
    pub published: usize,
    pub serialization_failures: usize,
    /// Subscribers the sink unregistered while publishing this tick.
    pub subscribers_dropped: usize,
    pub duration: Duration,
}

/// Owns the simulation random source and drives one tick at a time.
pub struct SimulationScheduler {
    store: Arc<TelemetryStore>,
    sink: Arc<dyn TelemetrySink>,
    rng: StdRng,
    period: Duration,
    tick: u64,
    timing: Arc<LoopTimingReporter>,
    metrics: Option<TelemetryMetrics>,
}

impl SimulationScheduler {
    pub fn new(
        store: Arc<TelemetryStore>,
        sink: Arc<dyn TelemetrySink>,
        config: &SimulationConfig,
    ) -> Self {
        let rng = config
            .random_seed
            .map(StdRng::seed_from_u64)
            .unwrap_or_else(StdRng::from_entropy);
        Self {
            store,
            sink,
            rng,
            period: config.tick_interval,
            tick: 0,
            timing: Arc::new(LoopTimingReporter::new(config.tick_interval)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: TelemetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spacing statistics of the ticks driven by [`SimulationScheduler::spawn`].
    pub fn timing(&self) -> Arc<LoopTimingReporter> {
        Arc::clone(&self.timing)
    }

    pub fn tick_once(&mut self) -> TickReport {
        self.tick_at(Utc::now())
    }

    /// Advance every record, then publish one event per advanced record.
    ///
    /// No store lock is held while publishing. Failures are confined to the
    /// record or subscriber involved.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();
        self.tick += 1;
        let tick = self.tick;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let rng = &mut self.rng;
        let results = self
            .store
            .advance_each(|record| advance(record, &mut *rng, now));

        let mut updated: Vec<TelemetryRecord> = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => updated.push(record),
                Err(err) => {
                    report.skipped += 1;
                    let vehicle = match &err {
                        TelemetryError::MalformedRecordState { id, .. } => id.as_str(),
                        _ => "",
                    };
                    fleet_warn!(
                        context = LogContext::new().with_vehicle(vehicle).with_tick(tick),
                        "skipping vehicle this tick: {}",
                        err
                    );
                }
            }
        }
        report.advanced = updated.len();

        for record in updated {
            let id = record.id.clone();
            let payload = match FleetEvent::VehicleUpdate(record).to_json() {
                Ok(json) => json,
                Err(source) => {
                    report.serialization_failures += 1;
                    let err = TelemetryError::Serialization { id, source };
                    fleet_warn!(
                        context = LogContext::new().with_tick(tick),
                        "not publishing update: {}",
                        err
                    );
                    continue;
                }
            };
            let outcome = self.sink.publish(Arc::from(payload));
            report.published += 1;
            report.subscribers_dropped += outcome.dropped;
        }

        report.duration = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_tick(report.duration.as_secs_f64());
            metrics.set_vehicle_count(self.store.len());
            metrics.add_records_skipped(report.skipped as u64);
            metrics.add_events_published(report.published as u64);
            metrics.add_serialization_failures(report.serialization_failures as u64);
        }
        fleet_debug!(
            context = LogContext::new().with_tick(tick),
            "tick complete: advanced={} skipped={} published={} dropped_subscribers={} duration_us={}",
            report.advanced,
            report.skipped,
            report.published,
            report.subscribers_dropped,
            duration_to_micros(report.duration)
        );
        report
    }

    /// Run the loop on the tokio runtime until the returned handle is shut
    /// down. The first tick fires one period after spawning; a tick that
    /// overruns causes the missed firings to be skipped.
    pub fn spawn(mut self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let timing = self.timing();
        let task = tokio::spawn(async move {
            let mut limiter = RateLimiter::delayed(self.period);
            log_system_event(
                None,
                "scheduler_start",
                &format!("simulation ticking every {:?}", self.period),
                SystemEventOutcome::Success,
            );
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    scheduled = limiter.tick() => {
                        if let Some(spacing) = self.timing.record_tick_at(scheduled.into_std()) {
                            let lag_us = tick_lag_us(spacing, self.period);
                            if lag_us.unsigned_abs() > duration_to_micros(self.period) / 10 {
                                fleet_warn!(
                                    context = LogContext::new().with_tick(self.tick + 1),
                                    "tick spacing off target by {}us",
                                    lag_us
                                );
                            }
                        }
                        self.tick_once();
                    }
                }
            }
            log_system_event(
                Some(&LogContext::new().with_tick(self.tick)),
                "scheduler_stop",
                "simulation loop stopped",
                SystemEventOutcome::Success,
            );
        });
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
            timing,
        }
    }
}

impl std::fmt::Debug for SimulationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationScheduler")
            .field("period", &self.period)
            .field("tick", &self.tick)
            .field("vehicles", &self.store.len())
            .finish()
    }
}

/// Running scheduler task.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    timing: Arc<LoopTimingReporter>,
}

impl SchedulerHandle {
    pub fn timing(&self) -> Arc<LoopTimingReporter> {
        Arc::clone(&self.timing)
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("simulation scheduler task failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Broadcaster, PublishReport};
    use crate::record::{BaseFields, VehicleStatus};
    use nf_common::config::ReferencePoint;
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Arc<str>>>,
    }

    impl TelemetrySink for Recorder {
        fn publish(&self, payload: Arc<str>) -> PublishReport {
            self.events.lock().push(payload);
            PublishReport {
                delivered: 1,
                dropped: 0,
            }
        }
    }

    fn store() -> Arc<TelemetryStore> {
        Arc::new(TelemetryStore::with_seed(
            ReferencePoint {
                latitude: 28.4595,
                longitude: 77.0266,
            },
            0.05,
            1,
        ))
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            tick_interval: Duration::from_secs(5),
            random_seed: Some(17),
        }
    }

    #[test]
    fn tick_publishes_one_event_per_record() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new().with_status("on-trip"));
        store.upsert("EV-2", &BaseFields::new().with_status("charging"));
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = SimulationScheduler::new(store.clone(), recorder.clone(), &config());

        let now = Utc::now();
        let report = scheduler.tick_at(now);
        assert_eq!(report.tick, 1);
        assert_eq!(report.advanced, 2);
        assert_eq!(report.published, 2);
        assert_eq!(report.skipped, 0);

        let events = recorder.events.lock();
        let mut ids: Vec<String> = events
            .iter()
            .map(|payload| {
                let value: Value = serde_json::from_str(payload).unwrap();
                assert_eq!(value["type"], "vehicle_update");
                value["id"].as_str().unwrap().to_owned()
            })
            .collect();
        ids.sort();
        assert_eq!(ids, ["EV-1", "EV-2"]);
        assert_eq!(store.get("EV-1").unwrap().last_update, Some(now));
    }

    #[test]
    fn malformed_record_is_skipped_without_stopping_the_tick() {
        let store = store();
        store.upsert("good", &BaseFields::new());
        store.upsert("broken", &BaseFields::new());
        store.update("broken", |record| record.longitude = f64::INFINITY);
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = SimulationScheduler::new(store.clone(), recorder.clone(), &config());

        let report = scheduler.tick_once();
        assert_eq!(report.advanced, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(recorder.events.lock().len(), 1);
        assert!(store.get("broken").unwrap().last_update.is_none());
        assert!(store.get("good").unwrap().last_update.is_some());
    }

    #[test]
    fn removed_vehicle_is_not_recreated_or_published() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new());
        store.upsert("EV-2", &BaseFields::new());
        store.remove("EV-1");
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = SimulationScheduler::new(store.clone(), recorder.clone(), &config());

        scheduler.tick_once();
        assert!(store.get("EV-1").is_none());
        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert!(!events[0].contains("\"EV-1\""));
    }

    #[test]
    fn charging_vehicle_completes_through_ticks() {
        let store = store();
        store.upsert(
            "EV-1",
            &BaseFields::new().with_status("charging").with_battery_level(97.0),
        );
        let mut scheduler =
            SimulationScheduler::new(store.clone(), Arc::new(Broadcaster::new(4)), &config());

        scheduler.tick_once();
        assert_eq!(store.get("EV-1").unwrap().status, VehicleStatus::Charging);
        scheduler.tick_once();
        scheduler.tick_once();
        assert_eq!(store.get("EV-1").unwrap().status, VehicleStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_waits_one_period_then_ticks() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new());
        let broadcaster = Arc::new(Broadcaster::new(8));
        let mut subscription = broadcaster.subscribe();
        let handle = SimulationScheduler::new(store, broadcaster.clone(), &config()).spawn();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(subscription.try_recv().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let payload = subscription.try_recv().unwrap();
        assert!(payload.contains("\"vehicle_update\""));

        handle.shutdown().await.unwrap();
    }
}
