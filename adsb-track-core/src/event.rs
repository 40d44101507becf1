//! Typed event records — one immutable logged facet update.
//!
//! Records arrive already decoded. On the wire (JSON lines) they are tagged by
//! `kind` with flat fields, e.g.
//! `{"kind":"position","timestamp":100.0,"address":"A1B2C3","latitude":34.0,...}`.

use serde::{Deserialize, Serialize};

use crate::types::*;

// ---------------------------------------------------------------------------
// Facet payloads
// ---------------------------------------------------------------------------

/// Identity facet: callsign and emitter category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub callsign: String,
    pub type_code: u8,
    pub category: u8,
}

/// Position facet (already CPR-resolved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub altitude_src: AltitudeSource,
}

/// Velocity facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub speed: f64,
    pub speed_src: SpeedType,
    pub vertical_speed: i32,
    pub vertical_speed_src: AltitudeSource,
    pub angle: f64,
    pub angle_src: AngleSource,
}

// ---------------------------------------------------------------------------
// Event records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityEvent {
    pub timestamp: f64,
    pub address: Address,
    #[serde(flatten)]
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub timestamp: f64,
    pub address: Address,
    #[serde(flatten)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityEvent {
    pub timestamp: f64,
    pub address: Address,
    #[serde(flatten)]
    pub velocity: Velocity,
}

/// Union type for all logged events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventRecord {
    Identity(IdentityEvent),
    Position(PositionEvent),
    Velocity(VelocityEvent),
}

impl EventRecord {
    pub fn identity(timestamp: f64, address: impl Into<Address>, identity: Identity) -> Self {
        EventRecord::Identity(IdentityEvent {
            timestamp,
            address: address.into(),
            identity,
        })
    }

    pub fn position(timestamp: f64, address: impl Into<Address>, position: Position) -> Self {
        EventRecord::Position(PositionEvent {
            timestamp,
            address: address.into(),
            position,
        })
    }

    pub fn velocity(timestamp: f64, address: impl Into<Address>, velocity: Velocity) -> Self {
        EventRecord::Velocity(VelocityEvent {
            timestamp,
            address: address.into(),
            velocity,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventRecord::Identity(_) => EventKind::Identity,
            EventRecord::Position(_) => EventKind::Position,
            EventRecord::Velocity(_) => EventKind::Velocity,
        }
    }

    /// Get the address from any record type.
    pub fn address(&self) -> &Address {
        match self {
            EventRecord::Identity(e) => &e.address,
            EventRecord::Position(e) => &e.address,
            EventRecord::Velocity(e) => &e.address,
        }
    }

    /// Get the timestamp from any record type.
    pub fn timestamp(&self) -> f64 {
        match self {
            EventRecord::Identity(e) => e.timestamp,
            EventRecord::Position(e) => e.timestamp,
            EventRecord::Velocity(e) => e.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position_line() {
        let line = r#"{"kind":"position","timestamp":100.0,"address":"a1b2c3",
            "latitude":34.0,"longitude":-118.0,"altitude":10000,"altitude_src":"BARO"}"#;
        let rec: EventRecord = serde_json::from_str(line).unwrap();

        assert_eq!(rec.kind(), EventKind::Position);
        assert_eq!(rec.address().as_str(), "A1B2C3");
        assert_eq!(rec.timestamp(), 100.0);
        match rec {
            EventRecord::Position(e) => {
                assert_eq!(e.position.altitude, 10000);
                assert_eq!(e.position.altitude_src, AltitudeSource::Baro);
            }
            other => panic!("expected position, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_velocity_line() {
        let line = r#"{"kind":"velocity","timestamp":5.5,"address":"485020","speed":159.2,
            "speed_src":"GS","vertical_speed":-832,"vertical_speed_src":"GNSS",
            "angle":182.88,"angle_src":"TRUE_NORTH"}"#;
        let rec: EventRecord = serde_json::from_str(line).unwrap();
        match rec {
            EventRecord::Velocity(e) => {
                assert_eq!(e.velocity.vertical_speed, -832);
                assert_eq!(e.velocity.speed_src, SpeedType::Ground);
                assert_eq!(e.velocity.angle_src, AngleSource::TrueNorth);
            }
            other => panic!("expected velocity, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_is_flat_and_tagged() {
        let rec = EventRecord::identity(
            1.0,
            "4840d6",
            Identity {
                callsign: "KLM1023".into(),
                type_code: 4,
                category: 0,
            },
        );
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["kind"], "identity");
        assert_eq!(json["address"], "4840D6");
        assert_eq!(json["callsign"], "KLM1023");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let line = r#"{"kind":"squawk","timestamp":1.0,"address":"ABCDEF"}"#;
        assert!(serde_json::from_str::<EventRecord>(line).is_err());
    }
}
