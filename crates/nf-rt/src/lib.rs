//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Runtime helpers supporting the simulation scheduler."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
//! Periodic scheduling helpers for the telemetry runtime.

pub mod scheduling;

pub use scheduling::RateLimiter;
