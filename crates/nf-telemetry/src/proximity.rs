//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Great-circle distance and nearest-first ordering."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Clamp latitude to the poles and wrap longitude into `[-180, 180]`.
    pub fn normalized(self) -> Self {
        let latitude = self.latitude.clamp(-90.0, 90.0);
        let longitude = if (-180.0..=180.0).contains(&self.longitude) {
            self.longitude
        } else {
            (self.longitude + 180.0).rem_euclid(360.0) - 180.0
        };
        Self::new(latitude, longitude)
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(*self, *other)
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    // Rounding can push `a` past 1 for near-antipodal points.
    let a = ((dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Anything that may report a position.
pub trait Located {
    /// `None` when the item has no usable coordinates.
    fn location(&self) -> Option<GeoPoint>;
}

impl Located for GeoPoint {
    fn location(&self) -> Option<GeoPoint> {
        self.is_valid().then_some(*self)
    }
}

/// Order `items` by ascending distance from `origin`.
///
/// The sort is stable, so equidistant items keep their input order. Items
/// without a location are placed after every located item.
pub fn rank_by_proximity<T: Located>(items: &mut [T], origin: GeoPoint) {
    items.sort_by(|left, right| compare_distance(distance_from(origin, left), distance_from(origin, right)));
}

/// Owned variant of [`rank_by_proximity`] that also returns the distances.
pub fn nearest_first<T: Located>(items: Vec<T>, origin: GeoPoint) -> Vec<(T, Option<f64>)> {
    let mut ranked: Vec<(T, Option<f64>)> = items
        .into_iter()
        .map(|item| {
            let distance = item.location().map(|point| origin.distance_km(&point));
            (item, distance)
        })
        .collect();
    ranked.sort_by(|(_, left), (_, right)| {
        compare_distance(left.unwrap_or(f64::INFINITY), right.unwrap_or(f64::INFINITY))
    });
    ranked
}

fn distance_from<T: Located>(origin: GeoPoint, item: &T) -> f64 {
    item.location()
        .map(|point| origin.distance_km(&point))
        .unwrap_or(f64::INFINITY)
}

fn compare_distance(left: f64, right: f64) -> Ordering {
    left.total_cmp(&right)
}
