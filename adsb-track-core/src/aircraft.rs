//! Per-aircraft best-known state with independently timestamped facets.
//!
//! Pure logic — no I/O, no database. Each facet (identity, position,
//! velocity) follows "strictly newer wins": an update is applied only when
//! its timestamp is greater than the one already stored for that facet.
//! Equal timestamps are dropped even when the payload differs.

use std::collections::VecDeque;

use serde::Serialize;

use crate::event::{Identity, Position, Velocity};
use crate::types::*;

/// Aircraft considered stale after this many seconds of silence.
pub const STALE_TIMEOUT: f64 = 60.0;

// ---------------------------------------------------------------------------
// Facets
// ---------------------------------------------------------------------------

/// A facet payload together with the time it was observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facet<T> {
    pub timestamp: f64,
    #[serde(flatten)]
    pub value: T,
}

/// Slot holding the latest value of one facet plus optional bounded history.
#[derive(Debug, Clone, PartialEq)]
struct FacetSlot<T> {
    current: Option<Facet<T>>,
    history: VecDeque<Facet<T>>,
    history_limit: usize,
}

impl<T: Clone> FacetSlot<T> {
    fn new(history_limit: usize) -> Self {
        FacetSlot {
            current: None,
            history: VecDeque::new(),
            history_limit,
        }
    }

    fn timestamp(&self) -> Option<f64> {
        self.current.as_ref().map(|f| f.timestamp)
    }

    /// Apply if strictly newer. Returns whether the facet changed.
    fn apply(&mut self, timestamp: f64, value: T) -> bool {
        if let Some(ts) = self.timestamp() {
            if timestamp <= ts {
                return false;
            }
        }
        let facet = Facet { timestamp, value };
        if self.history_limit > 0 {
            if self.history.len() == self.history_limit {
                self.history.pop_front();
            }
            self.history.push_back(facet.clone());
        }
        self.current = Some(facet);
        true
    }
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Mutable state for a single tracked aircraft.
///
/// Fields are private: the three `update_*` methods are the only mutation
/// path, and readers get an [`AircraftSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftState {
    address: Address,
    identity: FacetSlot<Identity>,
    position: FacetSlot<Position>,
    velocity: FacetSlot<Velocity>,
}

impl AircraftState {
    /// Fresh aircraft with every facet unset and history capture disabled.
    pub fn new(address: impl Into<Address>) -> Self {
        Self::with_history(address, 0)
    }

    /// Fresh aircraft that keeps up to `history_limit` past values per facet.
    pub fn with_history(address: impl Into<Address>, history_limit: usize) -> Self {
        AircraftState {
            address: address.into(),
            identity: FacetSlot::new(history_limit),
            position: FacetSlot::new(history_limit),
            velocity: FacetSlot::new(history_limit),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn update_identity(&mut self, timestamp: f64, identity: Identity) {
        if !self.identity.apply(timestamp, identity) {
            tracing::trace!(address = %self.address, timestamp, "stale identity update dropped");
        }
    }

    pub fn update_position(&mut self, timestamp: f64, position: Position) {
        if !self.position.apply(timestamp, position) {
            tracing::trace!(address = %self.address, timestamp, "stale position update dropped");
        }
    }

    pub fn update_velocity(&mut self, timestamp: f64, velocity: Velocity) {
        if !self.velocity.apply(timestamp, velocity) {
            tracing::trace!(address = %self.address, timestamp, "stale velocity update dropped");
        }
    }

    pub fn identity(&self) -> Option<&Facet<Identity>> {
        self.identity.current.as_ref()
    }

    pub fn position(&self) -> Option<&Facet<Position>> {
        self.position.current.as_ref()
    }

    pub fn velocity(&self) -> Option<&Facet<Velocity>> {
        self.velocity.current.as_ref()
    }

    /// Past position values, oldest first. Empty unless history is enabled.
    pub fn position_history(&self) -> impl Iterator<Item = &Facet<Position>> {
        self.position.history.iter()
    }

    /// Past velocity values, oldest first. Empty unless history is enabled.
    pub fn velocity_history(&self) -> impl Iterator<Item = &Facet<Velocity>> {
        self.velocity.history.iter()
    }

    /// Past identity values, oldest first. Empty unless history is enabled.
    pub fn identity_history(&self) -> impl Iterator<Item = &Facet<Identity>> {
        self.identity.history.iter()
    }

    /// Latest timestamp across all set facets.
    pub fn last_update(&self) -> Option<f64> {
        [
            self.identity.timestamp(),
            self.position.timestamp(),
            self.velocity.timestamp(),
        ]
        .into_iter()
        .flatten()
        .reduce(f64::max)
    }

    pub fn snapshot(&self) -> AircraftSnapshot {
        AircraftSnapshot {
            address: self.address.clone(),
            identity: self.identity.current.clone(),
            position: self.position.current.clone(),
            velocity: self.velocity.current.clone(),
            last_update: self.last_update(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable point-in-time copy of an aircraft, ready for display or export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftSnapshot {
    pub address: Address,
    pub identity: Option<Facet<Identity>>,
    pub position: Option<Facet<Position>>,
    pub velocity: Option<Facet<Velocity>>,
    pub last_update: Option<f64>,
}

impl AircraftSnapshot {
    pub fn callsign(&self) -> Option<&str> {
        self.identity.as_ref().map(|f| f.value.callsign.as_str())
    }

    pub fn age(&self, now: f64) -> Option<f64> {
        self.last_update.map(|ts| now - ts)
    }

    /// Display-side staleness only; the registry never evicts.
    pub fn is_stale(&self, now: f64) -> bool {
        self.age(now).is_none_or(|age| age > STALE_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
