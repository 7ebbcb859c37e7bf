//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Per-tick telemetry transition for a single vehicle."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! One simulation step is a pure function of the current record, a random
//! source and the tick timestamp. The store applies it under the record's
//! lock; nothing here touches shared state.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::TelemetryError;
use crate::proximity::GeoPoint;
use crate::record::{jitter, TelemetryRecord, VehicleStatus, MAX_BATTERY, MAX_RANGE};

const ON_TRIP_DRAIN: f64 = 0.5;
const ON_TRIP_RANGE_LOSS: f64 = 1.5;
const ON_TRIP_JITTER_DEG: f64 = 0.0005;
const ON_TRIP_SPEED: std::ops::Range<f64> = 20.0..70.0;

const CHARGE_RATE: f64 = 0.7;
const CHARGE_RANGE_PER_PERCENT: f64 = 3.0;
const CHARGED_THRESHOLD: f64 = 99.0;
const CHARGING_JITTER_DEG: f64 = 0.00005;

const IDLE_DRAIN: f64 = 0.05;
const IDLE_JITTER_DEG: f64 = 0.00025;
const IDLE_SPEED: std::ops::Range<f64> = 5.0..20.0;

/// Advance `record` by one tick.
///
/// Out-of-range stored values are repaired first. When the record cannot be
/// repaired it is left untouched and [`TelemetryError::MalformedRecordState`]
/// is returned so the caller can skip it until the next tick.
pub fn advance<R: Rng + ?Sized>(
    record: &mut TelemetryRecord,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<(), TelemetryError> {
    let mut next = record.clone();
    repair(&mut next)?;

    let mut range = f64::from(next.range);
    let (jitter_deg, speed) = match next.status {
        VehicleStatus::OnTrip => {
            next.battery_level = (next.battery_level - ON_TRIP_DRAIN).max(0.0);
            range = (range - ON_TRIP_RANGE_LOSS).max(0.0);
            (ON_TRIP_JITTER_DEG, rng.gen_range(ON_TRIP_SPEED))
        }
        VehicleStatus::Charging => {
            next.battery_level = (next.battery_level + CHARGE_RATE).min(MAX_BATTERY);
            range = (next.battery_level * CHARGE_RANGE_PER_PERCENT).min(f64::from(MAX_RANGE));
            if next.battery_level >= CHARGED_THRESHOLD {
                next.status = VehicleStatus::Available;
            }
            (CHARGING_JITTER_DEG, 0.0)
        }
        VehicleStatus::Available | VehicleStatus::Other(_) => {
            next.battery_level = (next.battery_level - IDLE_DRAIN).max(0.0);
            (IDLE_JITTER_DEG, rng.gen_range(IDLE_SPEED))
        }
    };

    let position = GeoPoint::new(
        next.latitude + jitter(rng, jitter_deg),
        next.longitude + jitter(rng, jitter_deg),
    )
    .normalized();
    next.latitude = position.latitude;
    next.longitude = position.longitude;
    next.speed = speed;
    next.range = range.trunc().clamp(0.0, f64::from(MAX_RANGE)) as u32;
    next.last_update = Some(now);

    *record = next;
    Ok(())
}

/// Bring stored fields back into their domains where that is possible.
fn repair(record: &mut TelemetryRecord) -> Result<(), TelemetryError> {
    if record.battery_level.is_nan() {
        return Err(malformed(record, "battery level is not a number"));
    }
    record.battery_level = record.battery_level.clamp(0.0, MAX_BATTERY);
    record.range = record.range.min(MAX_RANGE);
    if !record.speed.is_finite() || record.speed < 0.0 {
        record.speed = 0.0;
    }
    if !record.position().is_valid() {
        return Err(malformed(
            record,
            &format!(
                "coordinates ({}, {}) are not a valid position",
                record.latitude, record.longitude
            ),
        ));
    }
    Ok(())
}

fn malformed(record: &TelemetryRecord, detail: &str) -> TelemetryError {
    TelemetryError::MalformedRecordState {
        id: record.id.clone(),
        detail: detail.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BaseFields;
    use nf_common::config::ReferencePoint;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const REFERENCE: ReferencePoint = ReferencePoint {
        latitude: 28.4595,
        longitude: 77.0266,
    };

    fn vehicle(status: VehicleStatus, battery: f64, range: u32) -> TelemetryRecord {
        let fields = BaseFields::new()
            .with_status(status)
            .with_battery_level(battery)
            .with_range(range)
            .with_speed(40.0);
        TelemetryRecord::from_fields("EV-1", &fields, REFERENCE, 0.05, &mut StdRng::seed_from_u64(1))
    }

    #[test]
    fn on_trip_drains_and_moves() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut record = vehicle(VehicleStatus::OnTrip, 80.0, 300);
        let before = record.clone();
        let now = Utc::now();
        advance(&mut record, &mut rng, now).unwrap();

        assert_eq!(record.battery_level, 79.5);
        assert_eq!(record.range, 298);
        assert!((20.0..70.0).contains(&record.speed));
        assert!((record.latitude - before.latitude).abs() <= ON_TRIP_JITTER_DEG + 1e-12);
        assert!((record.longitude - before.longitude).abs() <= ON_TRIP_JITTER_DEG + 1e-12);
        assert_eq!(record.status, VehicleStatus::OnTrip);
        assert_eq!(record.last_update, Some(now));
        assert_eq!(record.battery_health, before.battery_health);
    }

    #[test]
    fn charging_recomputes_range_and_stops_moving() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut record = vehicle(VehicleStatus::Charging, 50.0, 10);
        advance(&mut record, &mut rng, Utc::now()).unwrap();

        assert!((record.battery_level - 50.7).abs() < 1e-9);
        assert_eq!(record.range, 152);
        assert_eq!(record.speed, 0.0);
        assert_eq!(record.status, VehicleStatus::Charging);
    }

    #[test]
    fn charged_vehicle_becomes_available() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut record = vehicle(VehicleStatus::Charging, 99.0, 200);
        advance(&mut record, &mut rng, Utc::now()).unwrap();

        assert_eq!(record.status, VehicleStatus::Available);
        assert!((record.battery_level - 99.7).abs() < 1e-9);
        assert_eq!(record.range, 299);
    }

    #[test]
    fn battery_never_leaves_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut drained = vehicle(VehicleStatus::OnTrip, 0.2, 1);
        advance(&mut drained, &mut rng, Utc::now()).unwrap();
        assert_eq!(drained.battery_level, 0.0);
        assert_eq!(drained.range, 0);

        let mut full = vehicle(VehicleStatus::Charging, 100.0, 500);
        advance(&mut full, &mut rng, Utc::now()).unwrap();
        assert_eq!(full.battery_level, 100.0);
        assert_eq!(full.range, 300);
    }

    #[test]
    fn unknown_status_is_simulated_as_available() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut record = vehicle(VehicleStatus::Other("maintenance".into()), 60.0, 250);
        advance(&mut record, &mut rng, Utc::now()).unwrap();

        assert!((record.battery_level - 59.95).abs() < 1e-9);
        assert_eq!(record.range, 250);
        assert!((5.0..20.0).contains(&record.speed));
        assert_eq!(record.status, VehicleStatus::Other("maintenance".into()));
    }

    #[test]
    fn invariants_hold_over_many_ticks() {
        let mut rng = StdRng::seed_from_u64(99);
        let statuses = [
            VehicleStatus::Available,
            VehicleStatus::OnTrip,
            VehicleStatus::Charging,
        ];
        for status in statuses {
            let mut record = vehicle(status.clone(), 50.0, 150);
            for _ in 0..500 {
                let before = record.battery_level;
                let status_before = record.status.clone();
                advance(&mut record, &mut rng, Utc::now()).unwrap();
                assert!((0.0..=MAX_BATTERY).contains(&record.battery_level));
                assert!(record.range <= MAX_RANGE);
                assert!(record.speed >= 0.0);
                assert!(record.position().is_valid());
                match status_before {
                    VehicleStatus::Charging => assert!(record.battery_level >= before),
                    _ => assert!(record.battery_level <= before),
                }
            }
        }
    }

    #[test]
    fn out_of_range_values_are_repaired() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut record = vehicle(VehicleStatus::Available, 50.0, 100);
        record.battery_level = 180.0;
        record.range = 9_000;
        record.speed = f64::INFINITY;
        advance(&mut record, &mut rng, Utc::now()).unwrap();

        assert!((record.battery_level - 99.95).abs() < 1e-9);
        assert_eq!(record.range, MAX_RANGE);
        assert!(record.speed.is_finite());
    }

    #[test]
    fn unrepairable_record_is_left_untouched() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut record = vehicle(VehicleStatus::OnTrip, 50.0, 100);
        record.latitude = f64::NAN;
        let before = record.clone();

        let err = advance(&mut record, &mut rng, Utc::now()).unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedRecordState { ref id, .. } if id == "EV-1"));
        assert_eq!(record.id, before.id);
        assert!(record.latitude.is_nan());
        assert_eq!(record.battery_level, before.battery_level);
        assert!(record.last_update.is_none());
    }
}
