//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Telemetry engine module exports and shared types."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! Live vehicle telemetry: the concurrent record store, the periodic
//! simulation that advances it, and the fan-out that pushes every update to
//! connected subscribers.

pub mod broadcast;
pub mod error;
pub mod fleet;
pub mod proximity;
pub mod record;
pub mod scheduler;
pub mod simulation;
pub mod store;

pub use broadcast::{
    BroadcastStats, Broadcaster, ChannelSubscriber, PublishReport, Subscriber, SubscriberId,
    Subscription, TelemetrySink,
};
pub use error::{TelemetryError, UnreachableReason};
pub use fleet::{vehicle_status_for_booking, FleetTelemetry, StatusDistribution, VehicleFilter};
pub use proximity::{
    haversine_km, nearest_first, rank_by_proximity, GeoPoint, Located, EARTH_RADIUS_KM,
};
pub use record::{BaseFields, FleetEvent, TelemetryRecord, VehicleStatus, MAX_BATTERY, MAX_RANGE};
pub use scheduler::{SchedulerHandle, SimulationScheduler, TickReport};
pub use simulation::advance;
pub use store::{TelemetryStore, UpsertOutcome};
