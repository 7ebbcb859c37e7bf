//! ---
//! nf_section: "03-logging-metrics"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Structured logging adapters and sinks."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-enriched logging macros shared by the telemetry crates.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod macros;

/// Install a compact subscriber writing through the test harness capture.
///
/// Respects `RUST_LOG` and defaults to `info`. Safe to call repeatedly.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_test_writer())
        .try_init();
}

/// Fleet fields attached to every event emitted through the `fleet_*` macros.
///
/// Unset fields are logged as empty strings (or `0` for the tick) so that
/// JSON output keeps a fixed shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Vehicle the event concerns.
    pub vehicle: Option<&'a str>,
    /// Broadcast subscriber the event concerns.
    pub subscriber: Option<&'a str>,
    /// Simulation tick sequence number.
    pub tick: Option<u64>,
    /// Vehicle status label.
    pub status: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the vehicle identifier.
    pub fn with_vehicle(self, vehicle: &'a str) -> Self {
        Self {
            vehicle: Some(vehicle),
            ..self
        }
    }

    /// Set the subscriber identifier.
    pub fn with_subscriber(self, subscriber: &'a str) -> Self {
        Self {
            subscriber: Some(subscriber),
            ..self
        }
    }

    /// Set the tick number.
    pub fn with_tick(self, tick: u64) -> Self {
        Self {
            tick: Some(tick),
            ..self
        }
    }

    /// Set the status label.
    pub fn with_status(self, status: &'a str) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }

    /// True when no field has been set.
    pub fn is_empty(&self) -> bool {
        self.vehicle.is_none()
            && self.subscriber.is_none()
            && self.tick.is_none()
            && self.status.is_none()
    }
}

/// Outcome of a lifecycle event; selects the level it is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// Completed normally (`INFO`).
    Success,
    /// Completed with something worth a look (`WARN`).
    Degraded,
    /// Failed or aborted (`ERROR`).
    Fault,
}

impl SystemEventOutcome {
    /// Label recorded in the `outcome` field.
    pub fn label(self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Log a lifecycle event such as `scheduler_start` or `daemon_stop`.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.label(),
                vehicle = ctx.vehicle.unwrap_or(""),
                subscriber = ctx.subscriber.unwrap_or(""),
                tick = ctx.tick.unwrap_or_default(),
                status = ctx.status.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(tracing::Level::INFO),
        SystemEventOutcome::Degraded => emit!(tracing::Level::WARN),
        SystemEventOutcome::Fault => emit!(tracing::Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new().with_vehicle("EV-001").with_tick(3);
        fleet_info!(context = ctx, "vehicle advanced");
        fleet_debug!("debug message");
        fleet_warn!(context = ctx.with_status("charging"), "battery low");
        fleet_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn builders_fill_independent_fields() {
        let ctx = LogContext::new();
        assert!(ctx.is_empty());
        let ctx = ctx.with_vehicle("EV-001").with_tick(7).with_status("on-trip");
        assert_eq!(ctx.vehicle, Some("EV-001"));
        assert_eq!(ctx.tick, Some(7));
        assert_eq!(ctx.status, Some("on-trip"));
        assert!(ctx.subscriber.is_none());
        assert!(!ctx.is_empty());
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_subscriber("sub-1");
        log_system_event(
            Some(&ctx),
            "test.event",
            "system event helper executed",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "test.event",
            "system event helper fault",
            SystemEventOutcome::Fault,
        );
        log_system_event(None, "test.event", "degraded", SystemEventOutcome::Degraded);
    }
}
