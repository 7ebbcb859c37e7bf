//! ---
//! nf_section: "03-logging-metrics"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Structured logging adapters and sinks."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! Level-specific logging macros carrying a [`LogContext`](crate::LogContext).

/// Shared expansion used by the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __fleet_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx: &$crate::LogContext = &$ctx;
        tracing::event!(
            $level,
            vehicle = ctx.vehicle.unwrap_or(""),
            subscriber = ctx.subscriber.unwrap_or(""),
            tick = ctx.tick.unwrap_or_default(),
            status = ctx.status.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with fleet context.
#[macro_export]
macro_rules! fleet_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with fleet context.
#[macro_export]
macro_rules! fleet_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with fleet context.
#[macro_export]
macro_rules! fleet_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with fleet context.
#[macro_export]
macro_rules! fleet_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fleet_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
