//! ---
//! nf_section: "05-networking-external-interfaces"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Subscriber-facing network transports."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Network surfaces that attach remote clients to the telemetry broadcaster.

pub mod websocket;

pub use websocket::{WebSocketServerBuilder, WebSocketServerHandle};
