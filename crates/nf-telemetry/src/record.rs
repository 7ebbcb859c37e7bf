//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Vehicle telemetry record and wire event types."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use nf_common::config::{ReferencePoint, SeedVehicle};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::proximity::{GeoPoint, Located};

pub const MAX_BATTERY: f64 = 100.0;
pub const MAX_RANGE: u32 = 500;

/// Keys carried as typed fields; never stored as free-form attributes.
const RESERVED_KEYS: &[&str] = &[
    "id",
    "type",
    "vehicleType",
    "status",
    "batteryLevel",
    "range",
    "latitude",
    "longitude",
    "speed",
    "batteryHealth",
    "lastUpdate",
];

/// Operational mode of a vehicle.
///
/// Only the first three drive the simulation; any other upstream status
/// (e.g. `maintenance`) is preserved verbatim and simulated like `available`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleStatus {
    #[default]
    Available,
    OnTrip,
    Charging,
    Other(String),
}

impl VehicleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::OnTrip => "on-trip",
            VehicleStatus::Charging => "charging",
            VehicleStatus::Other(other) => other,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "available" => VehicleStatus::Available,
            "on-trip" => VehicleStatus::OnTrip,
            "charging" => VehicleStatus::Charging,
            other => VehicleStatus::Other(other.to_owned()),
        }
    }
}

impl From<String> for VehicleStatus {
    fn from(value: String) -> Self {
        VehicleStatus::parse(&value)
    }
}

impl From<&str> for VehicleStatus {
    fn from(value: &str) -> Self {
        VehicleStatus::parse(value)
    }
}

impl From<VehicleStatus> for String {
    fn from(value: VehicleStatus) -> Self {
        match value {
            VehicleStatus::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current telemetry snapshot of one vehicle.
///
/// Field names serialize in camelCase. The vehicle type is exposed as
/// `vehicleType` because `type` is the event discriminator on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub id: String,
    pub status: VehicleStatus,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    pub battery_level: f64,
    pub range: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub battery_health: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Passthrough fields from registration (make, model, licensePlate, ...).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl TelemetryRecord {
    /// Build a record from caller-supplied fields, synthesizing every field
    /// that is absent or unusable.
    pub fn from_fields<R: Rng + ?Sized>(
        id: impl Into<String>,
        fields: &BaseFields,
        reference: ReferencePoint,
        spawn_radius_deg: f64,
        rng: &mut R,
    ) -> Self {
        let battery_level = fields
            .battery_level
            .and_then(sanitize_percentage)
            .unwrap_or_else(|| f64::from(rng.gen_range(0u32..100)));
        let range = fields
            .range
            .map(|range| range.min(MAX_RANGE))
            .unwrap_or_else(|| rng.gen_range(100u32..300));
        let battery_health = fields
            .battery_health
            .and_then(sanitize_percentage)
            .unwrap_or_else(|| f64::from(rng.gen_range(70u32..100)));
        let latitude = fields
            .latitude
            .filter(|lat| lat.is_finite() && (-90.0..=90.0).contains(lat))
            .unwrap_or_else(|| reference.latitude + jitter(rng, spawn_radius_deg));
        let longitude = fields
            .longitude
            .filter(|lon| lon.is_finite() && (-180.0..=180.0).contains(lon))
            .unwrap_or_else(|| reference.longitude + jitter(rng, spawn_radius_deg));
        let position = GeoPoint::new(latitude, longitude).normalized();
        let speed = fields
            .speed
            .filter(|speed| speed.is_finite())
            .map(|speed| speed.max(0.0))
            .unwrap_or_else(|| f64::from(rng.gen_range(30u32..70)));

        Self {
            id: id.into(),
            status: fields.status.clone().unwrap_or_default(),
            vehicle_type: fields.vehicle_type.clone(),
            battery_level,
            range,
            latitude: position.latitude,
            longitude: position.longitude,
            speed,
            battery_health,
            last_update: None,
            attributes: passthrough_attributes(&fields.attributes),
        }
    }

    /// Fill fields that are currently unset from `fields`. Populated fields
    /// are never overwritten. Returns whether anything changed.
    pub fn fill_missing(&mut self, fields: &BaseFields) -> bool {
        let mut changed = false;
        if self.vehicle_type.is_none() {
            if let Some(vehicle_type) = &fields.vehicle_type {
                self.vehicle_type = Some(vehicle_type.clone());
                changed = true;
            }
        }
        for (key, value) in passthrough_attributes(&fields.attributes) {
            if !self.attributes.contains_key(&key) {
                self.attributes.insert(key, value);
                changed = true;
            }
        }
        changed
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

impl Located for TelemetryRecord {
    fn location(&self) -> Option<GeoPoint> {
        let point = self.position();
        point.is_valid().then_some(point)
    }
}

/// Fields a collaborator supplies when registering a vehicle. Every field is
/// optional; missing ones are synthesized by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseFields {
    pub status: Option<VehicleStatus>,
    pub vehicle_type: Option<String>,
    pub battery_level: Option<f64>,
    pub range: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub battery_health: Option<f64>,
    pub attributes: BTreeMap<String, Value>,
}

impl BaseFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract fields from an untyped document such as an upstream vehicle
    /// record. Typed keys holding values of the wrong kind are treated as
    /// absent; unknown keys become passthrough attributes.
    pub fn from_map(map: serde_json::Map<String, Value>) -> Self {
        let mut fields = BaseFields::default();
        for (key, value) in map {
            match key.as_str() {
                "status" => fields.status = value.as_str().map(VehicleStatus::parse),
                "type" | "vehicleType" => {
                    if fields.vehicle_type.is_none() {
                        fields.vehicle_type = value.as_str().map(str::to_owned);
                    }
                }
                "batteryLevel" => fields.battery_level = value.as_f64(),
                "range" => {
                    fields.range = value
                        .as_f64()
                        .filter(|range| range.is_finite() && *range >= 0.0)
                        .map(|range| range.min(f64::from(MAX_RANGE)) as u32)
                }
                "latitude" => fields.latitude = value.as_f64(),
                "longitude" => fields.longitude = value.as_f64(),
                "speed" => fields.speed = value.as_f64(),
                "batteryHealth" => fields.battery_health = value.as_f64(),
                "id" | "lastUpdate" => {}
                _ => {
                    fields.attributes.insert(key, value);
                }
            }
        }
        fields
    }

    pub fn with_status(mut self, status: impl Into<VehicleStatus>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_vehicle_type(mut self, vehicle_type: impl Into<String>) -> Self {
        self.vehicle_type = Some(vehicle_type.into());
        self
    }

    pub fn with_battery_level(mut self, battery_level: f64) -> Self {
        self.battery_level = Some(battery_level);
        self
    }

    pub fn with_range(mut self, range: u32) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl From<&SeedVehicle> for BaseFields {
    fn from(seed: &SeedVehicle) -> Self {
        Self {
            status: seed.status.as_deref().map(VehicleStatus::parse),
            vehicle_type: seed.vehicle_type.clone(),
            battery_level: seed.battery_level,
            range: seed.range,
            latitude: seed.latitude,
            longitude: seed.longitude,
            speed: seed.speed,
            battery_health: None,
            attributes: seed.attributes.clone(),
        }
    }
}

/// Event pushed to subscribers once per vehicle per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    VehicleUpdate(TelemetryRecord),
}

impl FleetEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn sanitize_percentage(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, MAX_BATTERY))
}

fn passthrough_attributes(attributes: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    attributes
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Uniform sample in `[-amplitude, amplitude]`; zero for a non-positive amplitude.
pub(crate) fn jitter<R: Rng + ?Sized>(rng: &mut R, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    const GURUGRAM: ReferencePoint = ReferencePoint {
        latitude: 28.4595,
        longitude: 77.0266,
    };

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn status_round_trips_known_and_unknown_values() {
        assert_eq!(VehicleStatus::parse("on-trip"), VehicleStatus::OnTrip);
        assert_eq!(
            VehicleStatus::parse("maintenance"),
            VehicleStatus::Other("maintenance".into())
        );
        assert_eq!(String::from(VehicleStatus::Charging), "charging");
        assert_eq!(
            serde_json::to_value(VehicleStatus::Other("maintenance".into())).unwrap(),
            json!("maintenance")
        );
    }

    #[test]
    fn defaults_stay_inside_documented_ranges() {
        let mut rng = rng();
        for i in 0..200 {
            let record =
                TelemetryRecord::from_fields(format!("v{i}"), &BaseFields::new(), GURUGRAM, 0.05, &mut rng);
            assert_eq!(record.status, VehicleStatus::Available);
            assert!((0.0..100.0).contains(&record.battery_level));
            assert!((100..300).contains(&record.range));
            assert!((70.0..100.0).contains(&record.battery_health));
            assert!((30.0..70.0).contains(&record.speed));
            assert!((record.latitude - GURUGRAM.latitude).abs() <= 0.05);
            assert!((record.longitude - GURUGRAM.longitude).abs() <= 0.05);
            assert!(record.last_update.is_none());
        }
    }

    #[test]
    fn supplied_fields_win_and_bad_values_are_replaced() {
        let fields = BaseFields::new()
            .with_status("charging")
            .with_battery_level(140.0)
            .with_range(900)
            .with_position(f64::NAN, 77.2)
            .with_speed(-4.0);
        let record = TelemetryRecord::from_fields("EV-1", &fields, GURUGRAM, 0.05, &mut rng());
        assert_eq!(record.status, VehicleStatus::Charging);
        assert_eq!(record.battery_level, 100.0);
        assert_eq!(record.range, MAX_RANGE);
        assert!((record.latitude - GURUGRAM.latitude).abs() <= 0.05);
        assert_eq!(record.longitude, 77.2);
        assert_eq!(record.speed, 0.0);
    }

    #[test]
    fn from_map_splits_typed_fields_and_attributes() {
        let map = json!({
            "id": "ignored",
            "make": "Tesla",
            "licensePlate": "EV-001",
            "type": "ev",
            "status": "on-trip",
            "batteryLevel": 64,
            "latitude": "not-a-number",
            "range": 415.7
        });
        let fields = BaseFields::from_map(map.as_object().cloned().unwrap());
        assert_eq!(fields.vehicle_type.as_deref(), Some("ev"));
        assert_eq!(fields.status, Some(VehicleStatus::OnTrip));
        assert_eq!(fields.battery_level, Some(64.0));
        assert_eq!(fields.latitude, None);
        assert_eq!(fields.range, Some(415));
        assert_eq!(fields.attributes.len(), 2);
        assert!(!fields.attributes.contains_key("id"));
    }

    #[test]
    fn fill_missing_never_overwrites() {
        let fields = BaseFields::new()
            .with_vehicle_type("ev")
            .with_attribute("make", "Tesla");
        let mut record = TelemetryRecord::from_fields("EV-1", &fields, GURUGRAM, 0.05, &mut rng());
        let before = record.clone();

        let update = BaseFields::new()
            .with_vehicle_type("hybrid")
            .with_battery_level(1.0)
            .with_attribute("make", "BMW")
            .with_attribute("model", "i3");
        assert!(record.fill_missing(&update));
        assert_eq!(record.vehicle_type.as_deref(), Some("ev"));
        assert_eq!(record.battery_level, before.battery_level);
        assert_eq!(record.attributes["make"], json!("Tesla"));
        assert_eq!(record.attributes["model"], json!("i3"));
        assert!(!record.fill_missing(&update));
    }

    #[test]
    fn event_is_tagged_and_camel_cased() {
        let fields = BaseFields::new()
            .with_vehicle_type("ev")
            .with_attribute("licensePlate", "EV-001");
        let record = TelemetryRecord::from_fields("EV-1", &fields, GURUGRAM, 0.0, &mut rng());
        let value: Value =
            serde_json::from_str(&FleetEvent::VehicleUpdate(record.clone()).to_json().unwrap())
                .unwrap();
        assert_eq!(value["type"], json!("vehicle_update"));
        assert_eq!(value["id"], json!("EV-1"));
        assert_eq!(value["vehicleType"], json!("ev"));
        assert_eq!(value["licensePlate"], json!("EV-001"));
        assert_eq!(value["batteryLevel"], json!(record.battery_level));
        assert!(value.get("batteryHealth").is_some());
        assert!(value.get("lastUpdate").is_none());
    }
}
