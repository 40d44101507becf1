//! Recording session descriptor and its fingerprint.
//!
//! Encoding fed to SHA-1: host bytes, port as u16 big-endian, protocol
//! bytes, start time as f64 little-endian. Output is 40 lower-case hex chars.

use serde::Serialize;
use sha1::{Digest, Sha1};

/// Connection parameters of one recording run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub start: f64,
}

impl Session {
    pub fn new(host: impl Into<String>, port: u16, protocol: impl Into<String>, start: f64) -> Self {
        Session {
            host: host.into(),
            port,
            protocol: protocol.into(),
            start,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.host, self.port, &self.protocol, self.start)
    }
}

/// Stable identifier for a session.
pub fn fingerprint(host: &str, port: u16, protocol: &str, start: f64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(host.as_bytes());
    hasher.update(port.to_be_bytes());
    hasher.update(protocol.as_bytes());
    hasher.update(start.to_le_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
