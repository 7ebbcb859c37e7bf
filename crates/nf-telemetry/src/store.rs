//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Concurrent in-memory registry of live vehicle telemetry."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! The map lock guards only the set of ids. Each record sits behind its own
//! mutex so the simulation tick and external writers serialize per vehicle
//! without holding up the whole fleet.
//!
//! Lock order is always map, then record. A record slot is emptied when its
//! vehicle is removed, so a tick that collected the slot beforehand sees the
//! removal and leaves it alone.

use std::collections::HashMap;
use std::sync::Arc;

use nf_common::config::{FleetConfig, ReferencePoint};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::error::TelemetryError;
use crate::record::{BaseFields, TelemetryRecord, VehicleStatus};

type Slot = Arc<Mutex<Option<TelemetryRecord>>>;

/// Result of an [`TelemetryStore::upsert`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created.
    Created,
    /// The record existed and previously unset fields were filled.
    Filled,
    /// The record existed and nothing changed.
    Unchanged,
}

/// Thread-safe mapping from vehicle id to its current telemetry.
#[derive(Debug)]
pub struct TelemetryStore {
    records: RwLock<HashMap<String, Slot>>,
    reference: ReferencePoint,
    spawn_radius_deg: f64,
    rng: Mutex<StdRng>,
}

impl TelemetryStore {
    pub fn new(reference: ReferencePoint, spawn_radius_deg: f64) -> Self {
        Self::with_rng(reference, spawn_radius_deg, StdRng::from_entropy())
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.reference_point, config.spawn_radius_deg)
    }

    /// Store whose synthesized defaults come from a fixed seed.
    pub fn with_seed(reference: ReferencePoint, spawn_radius_deg: f64, seed: u64) -> Self {
        Self::with_rng(reference, spawn_radius_deg, StdRng::seed_from_u64(seed))
    }

    fn with_rng(reference: ReferencePoint, spawn_radius_deg: f64, rng: StdRng) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            reference,
            spawn_radius_deg,
            rng: Mutex::new(rng),
        }
    }

    pub fn reference_point(&self) -> ReferencePoint {
        self.reference
    }

    /// Create the record if absent, otherwise fill only its unset fields.
    pub fn upsert(&self, id: &str, fields: &BaseFields) -> UpsertOutcome {
        if let Some(slot) = self.slot(id) {
            if let Some(outcome) = fill_slot(&slot, fields) {
                return outcome;
            }
        }

        let candidate = {
            let mut rng = self.rng.lock();
            TelemetryRecord::from_fields(id, fields, self.reference, self.spawn_radius_deg, &mut *rng)
        };

        let mut records = self.records.write();
        if let Some(slot) = records.get(id) {
            // Lost a race with another registration of the same id.
            if let Some(outcome) = fill_slot(slot, fields) {
                return outcome;
            }
        }
        records.insert(id.to_owned(), Arc::new(Mutex::new(Some(candidate))));
        debug!(vehicle = %id, "vehicle registered");
        UpsertOutcome::Created
    }

    /// Delete the record. Returns `false` when the id was not tracked.
    pub fn remove(&self, id: &str) -> bool {
        let mut records = self.records.write();
        match records.remove(id) {
            Some(slot) => {
                slot.lock().take();
                debug!(vehicle = %id, "vehicle removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<TelemetryRecord> {
        self.slot(id).and_then(|slot| read_slot(&slot))
    }

    /// Point-in-time copies of every record, ordered by id. Each record is
    /// read under its own lock; the list as a whole is not a global snapshot.
    pub fn list(&self) -> Vec<TelemetryRecord> {
        let mut records: Vec<TelemetryRecord> = self
            .slots()
            .into_iter()
            .filter_map(|slot| read_slot(&slot))
            .collect();
        records.sort_by(|left, right| left.id.cmp(&right.id));
        records
    }

    /// Overwrite the status of a tracked vehicle. Returns `false` when absent.
    pub fn update_status(&self, id: &str, status: VehicleStatus) -> bool {
        self.update(id, |record| record.status = status)
    }

    /// Apply `mutate` to the record under its lock.
    pub fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut TelemetryRecord),
    {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let mut guard = slot.lock();
        match guard.as_mut() {
            Some(record) => {
                mutate(record);
                true
            }
            None => false,
        }
    }

    /// Run `step` against every live record, one record lock at a time.
    ///
    /// The map lock is released before any record is touched. Records removed
    /// before their turn are skipped. Returns a copy of each record `step`
    /// accepted, or the error it reported.
    pub fn advance_each<F>(&self, mut step: F) -> Vec<Result<TelemetryRecord, TelemetryError>>
    where
        F: FnMut(&mut TelemetryRecord) -> Result<(), TelemetryError>,
    {
        let slots = self.slots();
        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let mut guard = slot.lock();
            let Some(record) = guard.as_mut() else {
                continue;
            };
            results.push(step(&mut *record).map(|()| record.clone()));
        }
        results
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.read().contains_key(id)
    }

    fn slot(&self, id: &str) -> Option<Slot> {
        self.records.read().get(id).cloned()
    }

    fn slots(&self) -> Vec<Slot> {
        self.records.read().values().cloned().collect()
    }
}

fn read_slot(slot: &Slot) -> Option<TelemetryRecord> {
    slot.lock().clone()
}

/// `None` when the slot has been retired by a concurrent removal.
fn fill_slot(slot: &Slot, fields: &BaseFields) -> Option<UpsertOutcome> {
    let mut guard = slot.lock();
    let record = guard.as_mut()?;
    Some(if record.fill_missing(fields) {
        UpsertOutcome::Filled
    } else {
        UpsertOutcome::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> TelemetryStore {
        TelemetryStore::with_seed(
            ReferencePoint {
                latitude: 28.4595,
                longitude: 77.0266,
            },
            0.05,
            42,
        )
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = store();
        let fields = BaseFields::new()
            .with_vehicle_type("ev")
            .with_attribute("make", "Tata");
        assert_eq!(store.upsert("EV-1", &fields), UpsertOutcome::Created);
        let first = store.get("EV-1").unwrap();
        assert_eq!(store.upsert("EV-1", &fields), UpsertOutcome::Unchanged);
        assert_eq!(store.get("EV-1").unwrap(), first);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_fills_but_never_clobbers() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new().with_battery_level(42.0));
        let outcome = store.upsert(
            "EV-1",
            &BaseFields::new()
                .with_battery_level(90.0)
                .with_vehicle_type("ev")
                .with_attribute("model", json!("Nexon")),
        );
        assert_eq!(outcome, UpsertOutcome::Filled);
        let record = store.get("EV-1").unwrap();
        assert_eq!(record.battery_level, 42.0);
        assert_eq!(record.vehicle_type.as_deref(), Some("ev"));
        assert_eq!(record.attributes["model"], json!("Nexon"));
    }

    #[test]
    fn remove_is_a_noop_for_unknown_ids() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new());
        assert!(!store.remove("EV-2"));
        assert!(store.remove("EV-1"));
        assert!(store.get("EV-1").is_none());
        assert!(!store.contains("EV-1"));
        assert!(store.is_empty());
    }

    #[test]
    fn update_status_reports_missing_ids() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new());
        assert!(store.update_status("EV-1", VehicleStatus::Charging));
        assert_eq!(store.get("EV-1").unwrap().status, VehicleStatus::Charging);
        assert!(!store.update_status("ghost", VehicleStatus::OnTrip));
        assert!(store.get("ghost").is_none());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let store = store();
        for id in ["c", "a", "b"] {
            store.upsert(id, &BaseFields::new());
        }
        let ids: Vec<_> = store.list().into_iter().map(|record| record.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn advance_each_commits_accepted_steps_only() {
        let store = store();
        store.upsert("good", &BaseFields::new().with_speed(10.0));
        store.upsert("bad", &BaseFields::new().with_speed(10.0));

        let results = store.advance_each(|record| {
            if record.id == "bad" {
                return Err(TelemetryError::MalformedRecordState {
                    id: record.id.clone(),
                    detail: "test".into(),
                });
            }
            record.speed = 99.0;
            Ok(())
        });

        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|result| result.is_err()).count(), 1);
        assert_eq!(store.get("good").unwrap().speed, 99.0);
        assert_eq!(store.get("bad").unwrap().speed, 10.0);
    }

    #[test]
    fn removed_slot_is_skipped_by_a_collected_tick() {
        let store = store();
        store.upsert("EV-1", &BaseFields::new());
        let slots = store.slots();
        store.remove("EV-1");
        assert!(slots[0].lock().is_none());
        assert!(store.advance_each(|_| Ok(())).is_empty());
    }
}
