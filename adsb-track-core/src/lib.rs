//! adsb-track-core: live aircraft state, typed events, and replay.
//!
//! No async, no I/O — just state and algorithms. Frame decoding happens
//! upstream; this crate starts at typed [`EventRecord`]s. The durable log and
//! CLI live in `adsb-track`.

pub mod aircraft;
pub mod airspace;
pub mod config;
pub mod event;
pub mod replay;
pub mod session;
pub mod types;

// Re-export commonly used types at crate root
pub use aircraft::{AircraftSnapshot, AircraftState, Facet};
pub use airspace::{Airspace, AirspaceSnapshot, SharedAirspace};
pub use event::{EventRecord, Identity, Position, Velocity};
pub use replay::{replay, ReplayWindow, StopTime};
pub use session::{fingerprint, Session};
pub use types::*;
