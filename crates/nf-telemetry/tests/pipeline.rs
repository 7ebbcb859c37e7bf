//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "test"
//! nf_type: "source"
//! nf_scope: "test"
//! nf_description: "Scheduler to subscriber event flow."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use nf_common::config::{FleetConfig, SimulationConfig};
use nf_metrics::{new_registry, prometheus::TextEncoder, TelemetryMetrics};
use nf_telemetry::{
    BaseFields, Broadcaster, FleetEvent, FleetTelemetry, SimulationScheduler, TelemetryStore,
    VehicleStatus,
};

fn config() -> SimulationConfig {
    SimulationConfig {
        tick_interval: Duration::from_secs(5),
        random_seed: Some(99),
    }
}

#[tokio::test(start_paused = true)]
async fn subscribers_receive_camel_case_updates_every_period() {
    let store = Arc::new(TelemetryStore::from_config(&FleetConfig::default()));
    let fleet = FleetTelemetry::new(store.clone());
    fleet.register(
        "EV-001",
        &BaseFields::new()
            .with_vehicle_type("ev")
            .with_status("on-trip")
            .with_battery_level(80.0)
            .with_attribute("licensePlate", "HR26-0001"),
    );

    let broadcaster = Arc::new(Broadcaster::new(16));
    let mut subscription = broadcaster.subscribe();
    let handle = SimulationScheduler::new(store, broadcaster.clone(), &config()).spawn();

    tokio::time::sleep(Duration::from_secs(11)).await;

    let mut batteries = Vec::new();
    while let Some(payload) = subscription.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "vehicle_update");
        assert_eq!(value["vehicleType"], "ev");
        assert_eq!(value["licensePlate"], "HR26-0001");
        assert!(value["lastUpdate"].is_string());
        let FleetEvent::VehicleUpdate(record) = serde_json::from_str(&payload).unwrap();
        assert_eq!(record.status, VehicleStatus::OnTrip);
        batteries.push(record.battery_level);
    }
    assert_eq!(batteries, [79.5, 79.0]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn removed_vehicle_stops_publishing() {
    let store = Arc::new(TelemetryStore::from_config(&FleetConfig::default()));
    let fleet = FleetTelemetry::new(store.clone());
    fleet.register("EV-001", &BaseFields::new());
    fleet.register("EV-002", &BaseFields::new());

    let broadcaster = Arc::new(Broadcaster::new(16));
    let mut subscription = broadcaster.subscribe();
    let handle = SimulationScheduler::new(store, broadcaster.clone(), &config()).spawn();

    tokio::time::sleep(Duration::from_secs(6)).await;
    let mut first_tick = Vec::new();
    while let Some(payload) = subscription.try_recv() {
        first_tick.push(payload);
    }
    assert_eq!(first_tick.len(), 2);

    assert!(fleet.remove("EV-001"));
    tokio::time::sleep(Duration::from_secs(5)).await;
    let second_tick: Vec<_> = std::iter::from_fn(|| subscription.try_recv()).collect();
    assert_eq!(second_tick.len(), 1);
    assert!(second_tick[0].contains("\"EV-002\""));
    assert!(fleet.get("EV-001").is_err());

    handle.shutdown().await.unwrap();
}

#[test]
fn tick_metrics_are_exported() {
    let registry = new_registry();
    let metrics = TelemetryMetrics::new(registry.clone()).unwrap();
    let store = Arc::new(TelemetryStore::from_config(&FleetConfig::default()));
    store.upsert("EV-001", &BaseFields::new());
    let broadcaster = Arc::new(Broadcaster::new(1).with_metrics(metrics.clone()));
    let _slow = broadcaster.subscribe();
    let mut scheduler =
        SimulationScheduler::new(store, broadcaster.clone(), &config()).with_metrics(metrics);

    scheduler.tick_once();
    scheduler.tick_once();

    let body = TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap();
    assert!(body.contains("nf_simulation_ticks_total 2"));
    assert!(body.contains("nf_vehicles_tracked 1"));
    assert!(body.contains("nf_broadcast_events_published_total 2"));
    assert!(body.contains("nf_broadcast_subscribers 0"));
    assert!(body.contains("reason=\"queue_full\""));
}
