//! Shared types, error enum, and source tags for adsb-track-core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by adsb-track.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("duplicate {kind} record at timestamp {timestamp} for {address}")]
    DuplicateRecord {
        kind: EventKind,
        timestamp: f64,
        address: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cannot parse stop time: {0:?}")]
    TimeParse(String),
    #[error("event log contains no records")]
    EmptyLog,
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("invalid {field} tag: {value:?}")]
    InvalidTag { field: &'static str, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl TrackError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, TrackError::DuplicateRecord { .. })
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;

// ---------------------------------------------------------------------------
// Aircraft address
// ---------------------------------------------------------------------------

/// Aircraft address in canonical form (trimmed, upper-case).
///
/// Decoders hand out lower-case hex (`a1b2c3`); everything past the boundary
/// compares the normalized form so `a1b2c3` and `A1B2C3` are one aircraft.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: &str) -> Self {
        Address(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Address::new(raw)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address::new(&raw)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The three facets an event can update. Doubles as the log table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Identity,
    Position,
    Velocity,
}

impl EventKind {
    pub fn table(&self) -> &'static str {
        match self {
            EventKind::Identity => "identity",
            EventKind::Position => "position",
            EventKind::Velocity => "velocity",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// ---------------------------------------------------------------------------
// Source tags
// ---------------------------------------------------------------------------

/// Where an altitude or vertical rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeSource {
    #[serde(rename = "BARO")]
    Baro,
    #[serde(rename = "GNSS")]
    Gnss,
}

impl AltitudeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AltitudeSource::Baro => "BARO",
            AltitudeSource::Gnss => "GNSS",
        }
    }
}

/// Speed type for velocity messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedType {
    #[serde(rename = "GS")]
    Ground,
    #[serde(rename = "IAS")]
    IAS,
    #[serde(rename = "TAS")]
    TAS,
}

impl SpeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedType::Ground => "GS",
            SpeedType::IAS => "IAS",
            SpeedType::TAS => "TAS",
        }
    }
}

/// Reference for the heading angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngleSource {
    #[serde(rename = "TRUE_NORTH")]
    TrueNorth,
    #[serde(rename = "MAGNETIC_NORTH")]
    MagneticNorth,
}

impl AngleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AngleSource::TrueNorth => "TRUE_NORTH",
            AngleSource::MagneticNorth => "MAGNETIC_NORTH",
        }
    }
}

macro_rules! tag_impls {
    ($ty:ident, $field:literal, [$($variant:ident),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = TrackError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.eq_ignore_ascii_case($ty::$variant.as_str()) {
                        return Ok($ty::$variant);
                    }
                )+
                Err(TrackError::InvalidTag {
                    field: $field,
                    value: s.to_string(),
                })
            }
        }
    };
}

tag_impls!(AltitudeSource, "altitude source", [Baro, Gnss]);
tag_impls!(SpeedType, "speed type", [Ground, IAS, TAS]);
tag_impls!(AngleSource, "angle source", [TrueNorth, MagneticNorth]);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
