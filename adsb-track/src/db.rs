//! SQLite event log — WAL mode, one table per event kind.
//!
//! Schema: identity, position, velocity (primary key `(timestamp, address)`
//! on each), plus a `sessions` side table mapping a session fingerprint to
//! the span of event timestamps it recorded.
//!
//! Writes go through the [`EventSink`] trait. [`EventLog`] opens a
//! transaction lazily on the first append and keeps it open until
//! [`EventSink::commit`]; [`BufferedLog`] wraps any sink and commits every
//! `threshold` appends.
//!
//! Visibility caveat: uncommitted rows are visible to reads through the
//! same `EventLog` handle, but not to other connections. Nothing here relies
//! on either behavior; replay should run on its own connection.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

use adsb_track_core::event::*;
use adsb_track_core::session::Session;
use adsb_track_core::types::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identity (
    timestamp REAL NOT NULL,
    address TEXT NOT NULL,
    callsign TEXT NOT NULL,
    type_code INTEGER NOT NULL,
    category INTEGER NOT NULL,
    PRIMARY KEY (timestamp, address)
);

CREATE TABLE IF NOT EXISTS position (
    timestamp REAL NOT NULL,
    address TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    altitude INTEGER NOT NULL,
    altitude_src TEXT NOT NULL,
    PRIMARY KEY (timestamp, address)
);

CREATE TABLE IF NOT EXISTS velocity (
    timestamp REAL NOT NULL,
    address TEXT NOT NULL,
    speed REAL NOT NULL,
    speed_src TEXT NOT NULL,
    vertical_speed INTEGER NOT NULL,
    vertical_speed_src TEXT NOT NULL,
    angle REAL NOT NULL,
    angle_src TEXT NOT NULL,
    PRIMARY KEY (timestamp, address)
);

CREATE TABLE IF NOT EXISTS sessions (
    fingerprint TEXT PRIMARY KEY,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    protocol TEXT NOT NULL,
    start_time REAL NOT NULL,
    end_time REAL,
    first_record REAL,
    last_record REAL
);

CREATE INDEX IF NOT EXISTS idx_identity_address ON identity(address);
CREATE INDEX IF NOT EXISTS idx_position_address ON position(address);
CREATE INDEX IF NOT EXISTS idx_velocity_address ON velocity(address);
"#;

/// Map any rusqlite failure to a storage error.
fn storage(err: rusqlite::Error) -> TrackError {
    TrackError::Storage(err.to_string())
}

/// Map an insert failure, singling out primary-key violations.
fn insert_error(err: rusqlite::Error, kind: EventKind, timestamp: f64, address: &Address) -> TrackError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        {
            return TrackError::DuplicateRecord {
                kind,
                timestamp,
                address: address.to_string(),
            };
        }
    }
    storage(err)
}

// ---------------------------------------------------------------------------
// Sink capability
// ---------------------------------------------------------------------------

/// Anything that can durably record events.
///
/// Appends are submitted immediately; `commit` moves the durability
/// boundary. A duplicate `(timestamp, address)` within one kind must fail
/// with [`TrackError::DuplicateRecord`].
pub trait EventSink {
    fn append_identity(&mut self, timestamp: f64, address: &Address, identity: &Identity) -> Result<()>;

    fn append_position(&mut self, timestamp: f64, address: &Address, position: &Position) -> Result<()>;

    fn append_velocity(&mut self, timestamp: f64, address: &Address, velocity: &Velocity) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    /// Dispatch a record to the matching append.
    fn append(&mut self, record: &EventRecord) -> Result<()> {
        match record {
            EventRecord::Identity(e) => self.append_identity(e.timestamp, &e.address, &e.identity),
            EventRecord::Position(e) => self.append_position(e.timestamp, &e.address, &e.position),
            EventRecord::Velocity(e) => self.append_velocity(e.timestamp, &e.address, &e.velocity),
        }
    }
}

// ---------------------------------------------------------------------------
// SQLite log
// ---------------------------------------------------------------------------

/// SQLite database holding the event log.
pub struct EventLog {
    conn: Connection,
}

impl EventLog {
    /// Open or create a log at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().map_err(storage)?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path).map_err(storage)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;

        Ok(EventLog { conn })
    }

    /// Open in-memory log (for testing).
    #[cfg(test)]
    pub fn open_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Whether appends are waiting for a commit.
    #[cfg(test)]
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Open a transaction unless one is already running. Asks SQLite rather
    /// than tracking a flag: SQLite rolls back by itself on some I/O errors.
    fn begin(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN").map_err(storage)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Register a recording session under its fingerprint.
    pub fn start_session(&mut self, session: &Session) -> Result<String> {
        let fingerprint = session.fingerprint();
        self.conn
            .execute(
                "INSERT INTO sessions (fingerprint, host, port, protocol, start_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![fingerprint, session.host, session.port, session.protocol, session.start],
            )
            .map_err(storage)?;
        Ok(fingerprint)
    }

    /// Close a session, recording the event timestamps it covered.
    pub fn end_session(&mut self, fingerprint: &str, end_time: f64, span: Option<(f64, f64)>) -> Result<()> {
        let (first, last) = span.unzip();
        let updated = self
            .conn
            .execute(
                "UPDATE sessions SET end_time = ?1, first_record = ?2, last_record = ?3
                 WHERE fingerprint = ?4",
                params![end_time, first, last, fingerprint],
            )
            .map_err(storage)?;
        if updated == 0 {
            return Err(TrackError::UnknownSession(fingerprint.to_string()));
        }
        Ok(())
    }

    /// Record the span of event timestamps a still-open session has made
    /// durable so far.
    pub fn update_session_span(&mut self, fingerprint: &str, (first, last): (f64, f64)) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE sessions SET first_record = ?1, last_record = ?2 WHERE fingerprint = ?3",
                params![first, last, fingerprint],
            )
            .map_err(storage)?;
        if updated == 0 {
            return Err(TrackError::UnknownSession(fingerprint.to_string()));
        }
        Ok(())
    }

    pub fn get_session(&self, fingerprint: &str) -> Result<Option<SessionRow>> {
        self.conn
            .query_row(
                "SELECT fingerprint, host, port, protocol, start_time, end_time, first_record, last_record
                 FROM sessions WHERE fingerprint = ?1",
                params![fingerprint],
                session_row,
            )
            .optional()
            .map_err(storage)
    }

    /// All sessions, most recent first.
    pub fn sessions(&self) -> Result<Vec<SessionRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT fingerprint, host, port, protocol, start_time, end_time, first_record, last_record
                 FROM sessions ORDER BY start_time DESC",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], session_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Replay queries
    // -----------------------------------------------------------------------

    /// Timestamp of the newest record across all kinds.
    pub fn last_timestamp(&self) -> Result<Option<f64>> {
        self.conn
            .query_row(
                "SELECT MAX(ts) FROM (
                    SELECT MAX(timestamp) AS ts FROM identity
                    UNION ALL SELECT MAX(timestamp) FROM position
                    UNION ALL SELECT MAX(timestamp) FROM velocity
                )",
                [],
                |r| r.get(0),
            )
            .map_err(storage)
    }

    /// Timestamp of the oldest record across all kinds.
    pub fn first_timestamp(&self) -> Result<Option<f64>> {
        self.conn
            .query_row(
                "SELECT MIN(ts) FROM (
                    SELECT MIN(timestamp) AS ts FROM identity
                    UNION ALL SELECT MIN(timestamp) FROM position
                    UNION ALL SELECT MIN(timestamp) FROM velocity
                )",
                [],
                |r| r.get(0),
            )
            .map_err(storage)
    }

    /// Every record with `start <= timestamp <= stop`, ascending by timestamp.
    ///
    /// Records sharing a timestamp come out identity, position, velocity, then
    /// by address.
    pub fn records_between(&self, start: f64, stop: f64) -> Result<Vec<EventRecord>> {
        let mut records = self.identity_between(start, stop)?;
        records.extend(self.position_between(start, stop)?);
        records.extend(self.velocity_between(start, stop)?);
        // Stable: per-kind queries are already ordered
        records.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
        Ok(records)
    }

    /// Every record inside a session's recorded span.
    ///
    /// A closed session replays `[first_record, last_record]`. An open one
    /// (still recording, or killed before it could close) runs from its
    /// first durable record to the newest record in the log. Event
    /// timestamps come from the input, not the wall clock, so `start_time`
    /// is only the lower bound when no span was recorded yet.
    pub fn records_for_session(&self, fingerprint: &str) -> Result<Vec<EventRecord>> {
        let session = self
            .get_session(fingerprint)?
            .ok_or_else(|| TrackError::UnknownSession(fingerprint.to_string()))?;
        match (session.first_record, session.last_record, session.end_time) {
            (Some(first), Some(last), Some(_)) => self.records_between(first, last),
            (_, _, Some(_)) => Ok(Vec::new()),
            (first, _, None) => match self.last_timestamp()? {
                Some(latest) => self.records_between(first.unwrap_or(session.start_time), latest),
                None => Ok(Vec::new()),
            },
        }
    }

    fn identity_between(&self, start: f64, stop: f64) -> Result<Vec<EventRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp, address, callsign, type_code, category FROM identity
                 WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp, address",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![start, stop], |r| {
                Ok(EventRecord::identity(
                    r.get(0)?,
                    r.get::<_, String>(1)?,
                    Identity {
                        callsign: r.get(2)?,
                        type_code: r.get(3)?,
                        category: r.get(4)?,
                    },
                ))
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    fn position_between(&self, start: f64, stop: f64) -> Result<Vec<EventRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp, address, latitude, longitude, altitude, altitude_src FROM position
                 WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp, address",
            )
            .map_err(storage)?;
        let raw = stmt
            .query_map(params![start, stop], |r| {
                Ok((
                    r.get::<_, f64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, f64>(3)?,
                    r.get::<_, i32>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;

        raw.into_iter()
            .map(|(ts, address, latitude, longitude, altitude, src)| -> Result<EventRecord> {
                Ok(EventRecord::position(
                    ts,
                    address,
                    Position {
                        latitude,
                        longitude,
                        altitude,
                        altitude_src: src.parse()?,
                    },
                ))
            })
            .collect()
    }

    fn velocity_between(&self, start: f64, stop: f64) -> Result<Vec<EventRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp, address, speed, speed_src, vertical_speed, vertical_speed_src,
                        angle, angle_src FROM velocity
                 WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp, address",
            )
            .map_err(storage)?;
        let raw = stmt
            .query_map(params![start, stop], |r| {
                Ok((
                    r.get::<_, f64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i32>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, f64>(6)?,
                    r.get::<_, String>(7)?,
                ))
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;

        raw.into_iter()
            .map(|(ts, address, speed, speed_src, vs, vs_src, angle, angle_src)| -> Result<EventRecord> {
                Ok(EventRecord::velocity(
                    ts,
                    address,
                    Velocity {
                        speed,
                        speed_src: speed_src.parse()?,
                        vertical_speed: vs,
                        vertical_speed_src: vs_src.parse()?,
                        angle,
                        angle_src: angle_src.parse()?,
                    },
                ))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn count(&self, kind: EventKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        self.conn.query_row(&sql, [], |r| r.get(0)).map_err(storage)
    }

    pub fn stats(&self) -> Result<LogStats> {
        Ok(LogStats {
            identity: self.count(EventKind::Identity)?,
            position: self.count(EventKind::Position)?,
            velocity: self.count(EventKind::Velocity)?,
            sessions: self
                .conn
                .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
                .map_err(storage)?,
            aircraft: self
                .conn
                .query_row(
                    "SELECT COUNT(DISTINCT address) FROM (
                        SELECT address FROM identity
                        UNION ALL SELECT address FROM position
                        UNION ALL SELECT address FROM velocity
                    )",
                    [],
                    |r| r.get(0),
                )
                .map_err(storage)?,
            first_timestamp: self.first_timestamp()?,
            last_timestamp: self.last_timestamp()?,
        })
    }
}

impl EventSink for EventLog {
    fn append_identity(&mut self, timestamp: f64, address: &Address, identity: &Identity) -> Result<()> {
        self.begin()?;
        self.conn
            .execute(
                "INSERT INTO identity (timestamp, address, callsign, type_code, category)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    timestamp,
                    address.as_str(),
                    identity.callsign,
                    identity.type_code,
                    identity.category
                ],
            )
            .map_err(|e| insert_error(e, EventKind::Identity, timestamp, address))?;
        Ok(())
    }

    fn append_position(&mut self, timestamp: f64, address: &Address, position: &Position) -> Result<()> {
        self.begin()?;
        self.conn
            .execute(
                "INSERT INTO position (timestamp, address, latitude, longitude, altitude, altitude_src)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    timestamp,
                    address.as_str(),
                    position.latitude,
                    position.longitude,
                    position.altitude,
                    position.altitude_src.as_str()
                ],
            )
            .map_err(|e| insert_error(e, EventKind::Position, timestamp, address))?;
        Ok(())
    }

    fn append_velocity(&mut self, timestamp: f64, address: &Address, velocity: &Velocity) -> Result<()> {
        self.begin()?;
        self.conn
            .execute(
                "INSERT INTO velocity (timestamp, address, speed, speed_src, vertical_speed,
                                       vertical_speed_src, angle, angle_src)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    timestamp,
                    address.as_str(),
                    velocity.speed,
                    velocity.speed_src.as_str(),
                    velocity.vertical_speed,
                    velocity.vertical_speed_src.as_str(),
                    velocity.angle,
                    velocity.angle_src.as_str()
                ],
            )
            .map_err(|e| insert_error(e, EventKind::Velocity, timestamp, address))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT").map_err(storage)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Buffered commits
// ---------------------------------------------------------------------------

/// Commits the wrapped sink every `threshold` successful appends.
///
/// Dropping a `BufferedLog` commits whatever is pending; prefer
/// [`BufferedLog::close`] so a failing final commit is reported.
pub struct BufferedLog<S: EventSink> {
    sink: S,
    threshold: usize,
    pending: usize,
    // Any append attempted since the last commit, failed ones included: a
    // failed append may still have opened a transaction.
    dirty: bool,
}

impl<S: EventSink> BufferedLog<S> {
    pub fn new(sink: S, threshold: usize) -> Self {
        BufferedLog {
            sink,
            threshold: threshold.max(1),
            pending: 0,
            dirty: false,
        }
    }

    /// Appends submitted since the last commit.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Read access to the wrapped sink (sees uncommitted rows).
    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Final commit. Must run on every intentional shutdown path.
    pub fn close(mut self) -> Result<()> {
        self.commit()
    }

    fn submitted(&mut self, appended: Result<()>) -> Result<()> {
        self.dirty = true;
        appended?;
        self.pending += 1;
        if self.pending >= self.threshold {
            tracing::debug!(pending = self.pending, "buffer threshold reached, committing");
            self.commit()?;
        }
        Ok(())
    }
}

impl<S: EventSink> EventSink for BufferedLog<S> {
    fn append_identity(&mut self, timestamp: f64, address: &Address, identity: &Identity) -> Result<()> {
        let appended = self.sink.append_identity(timestamp, address, identity);
        self.submitted(appended)
    }

    fn append_position(&mut self, timestamp: f64, address: &Address, position: &Position) -> Result<()> {
        let appended = self.sink.append_position(timestamp, address, position);
        self.submitted(appended)
    }

    fn append_velocity(&mut self, timestamp: f64, address: &Address, velocity: &Velocity) -> Result<()> {
        let appended = self.sink.append_velocity(timestamp, address, velocity);
        self.submitted(appended)
    }

    fn commit(&mut self) -> Result<()> {
        self.sink.commit()?;
        self.pending = 0;
        self.dirty = false;
        Ok(())
    }
}

impl<S: EventSink> Drop for BufferedLog<S> {
    fn drop(&mut self) {
        if self.dirty {
            let pending = self.pending;
            match self.commit() {
                Ok(()) if pending > 0 => tracing::info!(pending, "committed buffered records on drop"),
                Ok(()) => {}
                Err(e) => tracing::error!(pending, "final commit failed, records lost: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRow {
    pub fingerprint: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub first_record: Option<f64>,
    pub last_record: Option<f64>,
}

fn session_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        fingerprint: r.get(0)?,
        host: r.get(1)?,
        port: r.get(2)?,
        protocol: r.get(3)?,
        start_time: r.get(4)?,
        end_time: r.get(5)?,
        first_record: r.get(6)?,
        last_record: r.get(7)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogStats {
    pub identity: i64,
    pub position: i64,
    pub velocity: i64,
    pub sessions: i64,
    pub aircraft: i64,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use adsb_track_core::replay::{replay, ReplayWindow, StopTime, DEFAULT_WINDOW};

    fn test_log() -> EventLog {
        EventLog::open_memory().unwrap()
    }

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn ident(callsign: &str) -> Identity {
        Identity {
            callsign: callsign.into(),
            type_code: 4,
            category: 3,
        }
    }

    fn pos(alt: i32) -> Position {
        Position {
            latitude: 34.0,
            longitude: -118.0,
            altitude: alt,
            altitude_src: AltitudeSource::Baro,
        }
    }

    fn vel() -> Velocity {
        Velocity {
            speed: 159.2,
            speed_src: SpeedType::Ground,
            vertical_speed: -832,
            vertical_speed_src: AltitudeSource::Gnss,
            angle: 182.88,
            angle_src: AngleSource::TrueNorth,
        }
    }

    #[test]
    fn test_open_memory() {
        let log = test_log();
        let stats = log.stats().unwrap();
        assert_eq!(stats.identity + stats.position + stats.velocity, 0);
        assert_eq!(stats.last_timestamp, None);
    }

    #[test]
    fn test_append_each_kind() {
        let mut log = test_log();
        log.append_identity(1.0, &addr("4840D6"), &ident("KLM1023")).unwrap();
        log.append_position(2.0, &addr("4840D6"), &pos(38000)).unwrap();
        log.append_velocity(3.0, &addr("4840D6"), &vel()).unwrap();
        log.commit().unwrap();

        assert_eq!(log.count(EventKind::Identity).unwrap(), 1);
        assert_eq!(log.count(EventKind::Position).unwrap(), 1);
        assert_eq!(log.count(EventKind::Velocity).unwrap(), 1);
        assert_eq!(log.stats().unwrap().aircraft, 1);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut log = test_log();
        log.append_identity(5.0, &addr("X"), &ident("FIRST")).unwrap();
        let err = log.append_identity(5.0, &addr("X"), &ident("SECOND")).unwrap_err();

        match err {
            TrackError::DuplicateRecord {
                kind,
                timestamp,
                address,
            } => {
                assert_eq!(kind, EventKind::Identity);
                assert_eq!(timestamp, 5.0);
                assert_eq!(address, "X");
            }
            other => panic!("expected DuplicateRecord, got {other:?}"),
        }

        log.commit().unwrap();
        let records = log.records_between(0.0, 10.0).unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            EventRecord::Identity(e) => assert_eq!(e.identity.callsign, "FIRST"),
            other => panic!("expected identity, got {other:?}"),
        }
    }

    #[test]
    fn test_same_key_different_kinds_allowed() {
        let mut log = test_log();
        log.append_identity(5.0, &addr("X"), &ident("A")).unwrap();
        log.append_position(5.0, &addr("X"), &pos(100)).unwrap();
        log.append_identity(5.0, &addr("Y"), &ident("B")).unwrap();
        log.append_identity(6.0, &addr("X"), &ident("C")).unwrap();
        assert_eq!(log.records_between(0.0, 10.0).unwrap().len(), 4);
    }

    #[test]
    fn test_records_between_ordered_and_bounded() {
        let mut log = test_log();
        log.append_position(130.0, &addr("A1B2C3"), &pos(4)).unwrap();
        log.append_velocity(70.0, &addr("A1B2C3"), &vel()).unwrap();
        log.append_position(10.0, &addr("A1B2C3"), &pos(1)).unwrap();
        log.append_identity(100.0, &addr("A1B2C3"), &ident("N1")).unwrap();
        log.append_position(70.0, &addr("A1B2C3"), &pos(3)).unwrap();
        log.commit().unwrap();

        let records = log.records_between(70.0, 130.0).unwrap();
        let seen: Vec<(f64, EventKind)> = records.iter().map(|r| (r.timestamp(), r.kind())).collect();
        assert_eq!(
            seen,
            vec![
                (70.0, EventKind::Position),
                (70.0, EventKind::Velocity),
                (100.0, EventKind::Identity),
                (130.0, EventKind::Position),
            ]
        );
    }

    #[test]
    fn test_records_roundtrip_payloads() {
        let mut log = test_log();
        log.append_velocity(1.5, &addr("485020"), &vel()).unwrap();
        log.append_position(2.5, &addr("485020"), &pos(38000)).unwrap();

        let records = log.records_between(0.0, 10.0).unwrap();
        assert_eq!(records[0], EventRecord::velocity(1.5, "485020", vel()));
        assert_eq!(records[1], EventRecord::position(2.5, "485020", pos(38000)));
    }

    #[test]
    fn test_last_and_first_timestamp() {
        let mut log = test_log();
        assert_eq!(log.last_timestamp().unwrap(), None);
        log.append_position(40.0, &addr("A"), &pos(1)).unwrap();
        log.append_identity(130.0, &addr("B"), &ident("X")).unwrap();
        log.append_velocity(10.0, &addr("C"), &vel()).unwrap();

        assert_eq!(log.last_timestamp().unwrap(), Some(130.0));
        assert_eq!(log.first_timestamp().unwrap(), Some(10.0));
    }

    #[test]
    fn test_buffer_auto_commit() {
        let mut log = BufferedLog::new(test_log(), 3);
        log.append_position(1.0, &addr("A"), &pos(1)).unwrap();
        assert_eq!(log.pending(), 1);
        assert!(log.sink().in_transaction());
        log.append_position(2.0, &addr("A"), &pos(2)).unwrap();
        assert_eq!(log.pending(), 2);
        log.append_position(3.0, &addr("A"), &pos(3)).unwrap();

        assert_eq!(log.pending(), 0);
        assert!(!log.sink().in_transaction());
    }

    #[test]
    fn test_buffer_failed_append_not_counted() {
        let mut log = BufferedLog::new(test_log(), 3);
        log.append_identity(5.0, &addr("X"), &ident("A")).unwrap();
        assert!(log.append_identity(5.0, &addr("X"), &ident("B")).unwrap_err().is_duplicate());
        assert_eq!(log.pending(), 1);
    }

    #[test]
    fn test_buffer_manual_commit_resets() {
        let mut log = BufferedLog::new(test_log(), 25);
        assert_eq!(log.threshold(), 25);
        log.append(&EventRecord::position(1.0, "A", pos(1))).unwrap();
        log.commit().unwrap();
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn test_zero_threshold_commits_every_append() {
        let mut log = BufferedLog::new(test_log(), 0);
        assert_eq!(log.threshold(), 1);
        log.append_position(1.0, &addr("A"), &pos(1)).unwrap();
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn test_pending_invisible_to_other_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let path = path.to_str().unwrap();

        let mut writer = BufferedLog::new(EventLog::open(path).unwrap(), 10);
        let reader = EventLog::open(path).unwrap();
        writer.append_position(1.0, &addr("A"), &pos(1)).unwrap();
        writer.append_position(2.0, &addr("A"), &pos(2)).unwrap();

        assert_eq!(reader.count(EventKind::Position).unwrap(), 0);
        // Same handle sees its own pending rows
        assert_eq!(writer.sink().count(EventKind::Position).unwrap(), 2);

        writer.close().unwrap();
        assert_eq!(reader.count(EventKind::Position).unwrap(), 2);
    }

    #[test]
    fn test_drop_commits_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let path = path.to_str().unwrap();

        {
            let mut writer = BufferedLog::new(EventLog::open(path).unwrap(), 10);
            writer.append_identity(1.0, &addr("A"), &ident("X")).unwrap();
        }

        let reader = EventLog::open(path).unwrap();
        assert_eq!(reader.count(EventKind::Identity).unwrap(), 1);
    }

    #[test]
    fn test_unbuffered_drop_loses_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let path = path.to_str().unwrap();

        {
            let mut raw = EventLog::open(path).unwrap();
            raw.append_identity(1.0, &addr("A"), &ident("X")).unwrap();
        }

        let reader = EventLog::open(path).unwrap();
        assert_eq!(reader.count(EventKind::Identity).unwrap(), 0);
    }

    #[test]
    fn test_commit_after_sqlite_rolled_back() {
        let mut log = test_log();
        log.append_position(1.0, &addr("A"), &pos(1)).unwrap();
        // Stand-in for SQLite aborting the transaction on its own (disk full)
        log.conn.execute_batch("ROLLBACK").unwrap();
        assert!(!log.in_transaction());

        log.commit().unwrap();
        log.append_position(2.0, &addr("A"), &pos(2)).unwrap();
        log.commit().unwrap();
        assert_eq!(log.count(EventKind::Position).unwrap(), 1);
    }

    /// Sink that rejects every append and counts commits.
    struct RejectingSink {
        commits: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl EventSink for RejectingSink {
        fn append_identity(&mut self, timestamp: f64, address: &Address, _: &Identity) -> Result<()> {
            Err(TrackError::DuplicateRecord {
                kind: EventKind::Identity,
                timestamp,
                address: address.to_string(),
            })
        }

        fn append_position(&mut self, _: f64, _: &Address, _: &Position) -> Result<()> {
            Err(TrackError::Storage("rejected".into()))
        }

        fn append_velocity(&mut self, _: f64, _: &Address, _: &Velocity) -> Result<()> {
            Err(TrackError::Storage("rejected".into()))
        }

        fn commit(&mut self) -> Result<()> {
            self.commits.set(self.commits.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_drop_commits_after_failed_append() {
        let commits = std::rc::Rc::new(std::cell::Cell::new(0));
        {
            let mut log = BufferedLog::new(RejectingSink { commits: commits.clone() }, 10);
            assert!(log.append_identity(5.0, &addr("X"), &ident("A")).is_err());
            assert_eq!(log.pending(), 0);
        }
        assert_eq!(commits.get(), 1);

        // Nothing attempted: nothing to commit
        drop(BufferedLog::new(RejectingSink { commits: commits.clone() }, 10));
        assert_eq!(commits.get(), 1);
    }

    #[test]
    fn test_replay_last_window_from_log() {
        let mut log = test_log();
        for (ts, alt) in [(10.0, 1000), (40.0, 2000), (70.0, 3000), (130.0, 4000)] {
            log.append_position(ts, &addr("A1B2C3"), &pos(alt)).unwrap();
        }
        log.commit().unwrap();

        let window = ReplayWindow::resolve(StopTime::Last, DEFAULT_WINDOW, || log.last_timestamp()).unwrap();
        let records = log.records_between(window.start, window.stop).unwrap();
        let seen: Vec<f64> = records.iter().map(|r| r.timestamp()).collect();
        assert_eq!(seen, vec![70.0, 130.0]);

        let airspace = replay(records);
        let ac = airspace.get("A1B2C3").unwrap();
        assert_eq!(ac.position().unwrap().value.altitude, 4000);
    }

    #[test]
    fn test_session_lifecycle() {
        let mut log = test_log();
        let session = Session::new("pi.lan", 30005, "beast", 100.0);
        let fp = log.start_session(&session).unwrap();
        assert_eq!(fp, session.fingerprint());

        let row = log.get_session(&fp).unwrap().unwrap();
        assert_eq!(row.host, "pi.lan");
        assert_eq!(row.port, 30005);
        assert_eq!(row.end_time, None);

        log.end_session(&fp, 200.0, Some((110.0, 190.0))).unwrap();
        let row = log.get_session(&fp).unwrap().unwrap();
        assert_eq!(row.end_time, Some(200.0));
        assert_eq!(row.first_record, Some(110.0));
        assert_eq!(row.last_record, Some(190.0));
        assert_eq!(log.sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_end_unknown_session() {
        let mut log = test_log();
        assert!(matches!(
            log.end_session("nope", 1.0, None),
            Err(TrackError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_records_for_session() {
        let mut log = test_log();
        log.append_position(50.0, &addr("A"), &pos(1)).unwrap();

        let fp = log.start_session(&Session::new("h", 1, "raw", 100.0)).unwrap();
        log.append_position(110.0, &addr("A"), &pos(2)).unwrap();
        log.append_identity(150.0, &addr("A"), &ident("N1")).unwrap();

        // Open session extends to newest record
        assert_eq!(log.records_for_session(&fp).unwrap().len(), 2);

        log.end_session(&fp, 300.0, Some((110.0, 120.0))).unwrap();
        let records = log.records_for_session(&fp).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp(), 110.0);

        // Closed without recording anything
        let empty = log.start_session(&Session::new("h", 1, "raw", 400.0)).unwrap();
        log.end_session(&empty, 401.0, None).unwrap();
        assert!(log.records_for_session(&empty).unwrap().is_empty());

        assert!(matches!(
            log.records_for_session("missing"),
            Err(TrackError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_open_session_replays_past_capture() {
        let mut log = test_log();
        // Session started "now"; the capture being recorded is from the past
        let fp = log.start_session(&Session::new("h", 1, "raw", 1_700_000_000.0)).unwrap();
        log.append_position(100.0, &addr("A"), &pos(1)).unwrap();
        log.append_position(120.0, &addr("A"), &pos(2)).unwrap();
        log.commit().unwrap();
        assert!(log.records_for_session(&fp).unwrap().is_empty());

        log.update_session_span(&fp, (100.0, 120.0)).unwrap();
        log.append_position(130.0, &addr("A"), &pos(3)).unwrap();

        let row = log.get_session(&fp).unwrap().unwrap();
        assert_eq!(row.end_time, None);
        let seen: Vec<f64> = log.records_for_session(&fp).unwrap().iter().map(|r| r.timestamp()).collect();
        assert_eq!(seen, vec![100.0, 120.0, 130.0]);

        assert!(matches!(
            log.update_session_span("missing", (1.0, 2.0)),
            Err(TrackError::UnknownSession(_))
        ));
    }
}
