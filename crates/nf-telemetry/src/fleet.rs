//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Collaborator-facing facade over the telemetry store."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! Entry points used by the vehicle registry, driver assignment and booking
//! flows, plus the read-side queries served to dashboards.

use std::collections::BTreeMap;
use std::sync::Arc;

use nf_common::config::FleetConfig;
use nf_logging::{fleet_info, LogContext};
use serde::Serialize;

use crate::error::TelemetryError;
use crate::proximity::{rank_by_proximity, GeoPoint};
use crate::record::{BaseFields, TelemetryRecord, VehicleStatus};
use crate::store::{TelemetryStore, UpsertOutcome};

/// Map a booking lifecycle status onto the vehicle status it implies.
/// Returns `None` for booking states that do not affect the vehicle.
pub fn vehicle_status_for_booking(booking_status: &str) -> Option<VehicleStatus> {
    match booking_status.trim().to_ascii_lowercase().as_str() {
        "in-progress" | "in_progress" | "started" | "ongoing" => Some(VehicleStatus::OnTrip),
        "completed" | "cancelled" | "canceled" => Some(VehicleStatus::Available),
        _ => None,
    }
}

/// Equality filters applied to listings. Empty strings match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleFilter {
    pub status: Option<String>,
    pub vehicle_type: Option<String>,
}

impl VehicleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_vehicle_type(mut self, vehicle_type: impl Into<String>) -> Self {
        self.vehicle_type = Some(vehicle_type.into());
        self
    }

    pub fn matches(&self, record: &TelemetryRecord) -> bool {
        let status_ok = match non_empty(&self.status) {
            Some(status) => record.status.as_str() == status,
            None => true,
        };
        let type_ok = match non_empty(&self.vehicle_type) {
            Some(vehicle_type) => record.vehicle_type.as_deref() == Some(vehicle_type),
            None => true,
        };
        status_ok && type_ok
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Fleet-wide status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDistribution {
    pub total_vehicles: usize,
    pub active_trips: usize,
    pub available_vehicles: usize,
    pub charging_vehicles: usize,
    pub status_breakdown: BTreeMap<String, usize>,
}

/// Facade bundling the store with the status rules the rest of the platform
/// relies on.
#[derive(Debug, Clone)]
pub struct FleetTelemetry {
    store: Arc<TelemetryStore>,
}

impl FleetTelemetry {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    /// Register every vehicle listed in the fleet configuration.
    pub fn seed_from_config(&self, config: &FleetConfig) -> usize {
        let mut created = 0;
        for seed in &config.seed {
            if self.register(&seed.id, &BaseFields::from(seed)) == UpsertOutcome::Created {
                created += 1;
            }
        }
        if created > 0 {
            fleet_info!("seeded {} vehicles from configuration", created);
        }
        created
    }

    pub fn register(&self, id: &str, fields: &BaseFields) -> UpsertOutcome {
        let outcome = self.store.upsert(id, fields);
        if outcome == UpsertOutcome::Created {
            fleet_info!(
                context = LogContext::new().with_vehicle(id),
                "vehicle now tracked"
            );
        }
        outcome
    }

    pub fn remove(&self, id: &str) -> bool {
        self.store.remove(id)
    }

    pub fn assign_driver(&self, id: &str) -> Result<(), TelemetryError> {
        self.update_status(id, VehicleStatus::OnTrip)
    }

    pub fn remove_driver(&self, id: &str) -> Result<(), TelemetryError> {
        self.update_status(id, VehicleStatus::Available)
    }

    /// Apply the vehicle side effect of a booking status change. Returns the
    /// status applied, or `None` when the booking status has no effect.
    pub fn apply_booking_status(
        &self,
        id: &str,
        booking_status: &str,
    ) -> Result<Option<VehicleStatus>, TelemetryError> {
        match vehicle_status_for_booking(booking_status) {
            Some(status) => {
                self.update_status(id, status.clone())?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    pub fn update_status(&self, id: &str, status: VehicleStatus) -> Result<(), TelemetryError> {
        let label = status.to_string();
        if self.store.update_status(id, status) {
            fleet_info!(
                context = LogContext::new().with_vehicle(id).with_status(&label),
                "status changed"
            );
            Ok(())
        } else {
            Err(TelemetryError::NotFound(id.to_owned()))
        }
    }

    pub fn get(&self, id: &str) -> Result<TelemetryRecord, TelemetryError> {
        self.store
            .get(id)
            .ok_or_else(|| TelemetryError::NotFound(id.to_owned()))
    }

    pub fn list(&self) -> Vec<TelemetryRecord> {
        self.store.list()
    }

    pub fn list_filtered(&self, filter: &VehicleFilter) -> Vec<TelemetryRecord> {
        self.store
            .list()
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect()
    }

    pub fn list_sorted_by_proximity(
        &self,
        origin: GeoPoint,
        filter: &VehicleFilter,
    ) -> Vec<TelemetryRecord> {
        let mut records = self.list_filtered(filter);
        rank_by_proximity(&mut records, origin);
        records
    }

    pub fn status_distribution(&self) -> StatusDistribution {
        let mut distribution = StatusDistribution::default();
        for record in self.store.list() {
            distribution.total_vehicles += 1;
            match record.status {
                VehicleStatus::OnTrip => distribution.active_trips += 1,
                VehicleStatus::Available => distribution.available_vehicles += 1,
                VehicleStatus::Charging => distribution.charging_vehicles += 1,
                VehicleStatus::Other(_) => {}
            }
            *distribution
                .status_breakdown
                .entry(record.status.to_string())
                .or_default() += 1;
        }
        distribution
    }
}
