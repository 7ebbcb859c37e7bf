//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Telemetry engine error taxonomy."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::fmt;

/// Failures raised by the telemetry engine. None of them is fatal to the
/// process; each is scoped to one vehicle or one subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Lookup or update against an id the store does not hold.
    #[error("vehicle {0} is not tracked")]
    NotFound(String),
    /// A record could not be encoded for broadcast.
    #[error("failed to encode update for vehicle {id}: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    /// A send to one subscriber failed.
    #[error("subscriber {subscriber} unreachable: {reason}")]
    SubscriberUnreachable {
        subscriber: String,
        reason: UnreachableReason,
    },
    /// Stored state that cannot be repaired in place.
    #[error("vehicle {id} has malformed state: {detail}")]
    MalformedRecordState { id: String, detail: String },
}

/// Why a subscriber could not take an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnreachableReason {
    /// The subscriber's queue is full; it is not keeping up.
    QueueFull,
    /// The receiving side has gone away.
    Disconnected,
    /// Transport-specific failure.
    Transport(String),
}

impl UnreachableReason {
    /// Short label used for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            UnreachableReason::QueueFull => "queue_full",
            UnreachableReason::Disconnected => "disconnected",
            UnreachableReason::Transport(_) => "transport",
        }
    }
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::QueueFull => f.write_str("queue full"),
            UnreachableReason::Disconnected => f.write_str("disconnected"),
            UnreachableReason::Transport(detail) => write!(f, "transport error: {detail}"),
        }
    }
}
