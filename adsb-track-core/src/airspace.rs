//! Airspace registry: address → aircraft state.
//!
//! The registry only grows. Entries are created on first observation and are
//! never evicted here; staleness filtering is left to whoever displays the
//! data. Live consumers share one registry through [`SharedAirspace`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::aircraft::{AircraftSnapshot, AircraftState};
use crate::event::{EventRecord, Identity, Position, Velocity};
use crate::types::Address;

/// All aircraft seen so far, keyed by normalized address.
#[derive(Debug, Clone, Default)]
pub struct Airspace {
    flights: HashMap<Address, AircraftState>,
    history_limit: usize,
}

impl Airspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose aircraft keep up to `history_limit` past values per facet.
    pub fn with_history(history_limit: usize) -> Self {
        Airspace {
            flights: HashMap::new(),
            history_limit,
        }
    }

    /// Get the aircraft for `address`, inserting an all-unset entry if new.
    pub fn get_or_create(&mut self, address: impl Into<Address>) -> &mut AircraftState {
        let address = address.into();
        let history_limit = self.history_limit;
        self.flights.entry(address).or_insert_with_key(|addr| {
            tracing::debug!(address = %addr, "new aircraft");
            AircraftState::with_history(addr.clone(), history_limit)
        })
    }

    pub fn get(&self, address: &str) -> Option<&AircraftState> {
        self.flights.get(&Address::new(address))
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    pub fn update_identity(&mut self, address: impl Into<Address>, timestamp: f64, identity: Identity) {
        self.get_or_create(address).update_identity(timestamp, identity);
    }

    pub fn update_position(&mut self, address: impl Into<Address>, timestamp: f64, position: Position) {
        self.get_or_create(address).update_position(timestamp, position);
    }

    pub fn update_velocity(&mut self, address: impl Into<Address>, timestamp: f64, velocity: Velocity) {
        self.get_or_create(address).update_velocity(timestamp, velocity);
    }

    /// Dispatch a logged record to the matching facet update.
    pub fn apply(&mut self, record: &EventRecord) {
        match record {
            EventRecord::Identity(e) => {
                self.update_identity(e.address.clone(), e.timestamp, e.identity.clone())
            }
            EventRecord::Position(e) => {
                self.update_position(e.address.clone(), e.timestamp, e.position.clone())
            }
            EventRecord::Velocity(e) => {
                self.update_velocity(e.address.clone(), e.timestamp, e.velocity.clone())
            }
        }
    }

    /// Point-in-time copy of every aircraft. Later updates are not reflected.
    pub fn all(&self) -> AirspaceSnapshot {
        AirspaceSnapshot {
            aircraft: self
                .flights
                .iter()
                .map(|(addr, ac)| (addr.clone(), ac.snapshot()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Detached copy of the registry. Iterate it as many times as needed;
/// serializes as a map of address → aircraft snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AirspaceSnapshot {
    aircraft: BTreeMap<Address, AircraftSnapshot>,
}

impl AirspaceSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &AircraftSnapshot> {
        self.aircraft.values()
    }

    pub fn get(&self, address: &str) -> Option<&AircraftSnapshot> {
        self.aircraft.get(&Address::new(address))
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Every aircraft, most recently updated first.
    pub fn newest_first(&self) -> Vec<&AircraftSnapshot> {
        let mut aircraft: Vec<_> = self.iter().collect();
        aircraft.sort_by(|a, b| {
            let a = a.last_update.unwrap_or(f64::NEG_INFINITY);
            let b = b.last_update.unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        });
        aircraft
    }

    /// Non-stale aircraft, most recently updated first.
    pub fn active(&self, now: f64) -> Vec<&AircraftSnapshot> {
        let mut aircraft = self.newest_first();
        aircraft.retain(|ac| !ac.is_stale(now));
        aircraft
    }
}

impl<'a> IntoIterator for &'a AirspaceSnapshot {
    type Item = &'a AircraftSnapshot;
    type IntoIter = std::collections::btree_map::Values<'a, Address, AircraftSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.aircraft.values()
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Cloneable handle to one registry shared by the producer and status paths.
///
/// The producer mutates through [`SharedAirspace::write`]; readers only ever
/// get detached snapshots.
#[derive(Debug, Clone, Default)]
pub struct SharedAirspace {
    inner: Arc<RwLock<Airspace>>,
}

impl SharedAirspace {
    pub fn new(airspace: Airspace) -> Self {
        SharedAirspace {
            inner: Arc::new(RwLock::new(airspace)),
        }
    }

    /// Run `f` with exclusive access. A panicked writer leaves per-facet state
    /// consistent, so poisoning is ignored.
    pub fn write<R>(&self, f: impl FnOnce(&mut Airspace) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn apply(&self, record: &EventRecord) {
        self.write(|airspace| airspace.apply(record));
    }

    pub fn all(&self) -> AirspaceSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all()
    }

    pub fn snapshot(&self, address: &str) -> Option<AircraftSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(AircraftState::snapshot)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
