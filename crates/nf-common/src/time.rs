//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Shared primitives and utilities for the core runtime."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::time::Duration;

/// Convert a duration into microseconds, saturating at `u64::MAX`.
pub fn duration_to_micros(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(1_000_000)
        .saturating_add(u64::from(duration.subsec_micros()))
}

/// Signed difference between the observed and expected tick spacing in microseconds.
pub fn tick_lag_us(actual: Duration, expected: Duration) -> i64 {
    let actual_us = actual.as_secs_f64() * 1_000_000.0;
    let expected_us = expected.as_secs_f64() * 1_000_000.0;
    (actual_us - expected_us).round() as i64
}
