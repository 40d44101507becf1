//! Point-in-time airspace reconstruction from logged events.
//!
//! Replay is a fold of records into a fresh [`Airspace`]. Records must already
//! be in ascending timestamp order; they are not re-sorted here, so an
//! unordered slice can end in a different state than true time order would.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

use crate::airspace::Airspace;
use crate::event::EventRecord;
use crate::types::*;

/// Default replay window in seconds.
pub const DEFAULT_WINDOW: f64 = 60.0;

/// Naive datetime layouts accepted after RFC 3339 fails. Interpreted in the
/// local timezone.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Watermark a replay window ends at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopTime {
    /// Absolute epoch seconds.
    At(f64),
    /// Timestamp of the newest record in the log.
    Last,
    /// Wall-clock time when the window is resolved. Only reachable by
    /// omitting the stop argument; the string `now` does not parse.
    Now,
}

impl FromStr for StopTime {
    type Err = TrackError;

    /// Accepts epoch seconds, `last`, or an ISO-8601 datetime.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("last") {
            return Ok(StopTime::Last);
        }
        if let Ok(ts) = s.parse::<f64>() {
            if ts.is_finite() {
                return Ok(StopTime::At(ts));
            }
        }
        parse_iso8601(s)
            .map(StopTime::At)
            .ok_or_else(|| TrackError::TimeParse(s.to_string()))
    }
}

fn parse_iso8601(s: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(epoch_seconds(&dt));
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    // Ambiguous wall times (DST fall-back) take the earlier instant; times
    // inside a DST gap do not exist and fail to parse.
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| epoch_seconds(&dt))
}

fn epoch_seconds<Tz: TimeZone>(dt: &DateTime<Tz>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

/// Current wall-clock time in epoch seconds.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Closed time interval `[start, stop]` to replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayWindow {
    pub start: f64,
    pub stop: f64,
}

impl ReplayWindow {
    /// Resolve a stop time into a window of `window` seconds ending at it.
    ///
    /// `latest` is only consulted for [`StopTime::Last`]; it returns the newest
    /// stored timestamp, or `None` when the log is empty.
    pub fn resolve<F>(stop: StopTime, window: f64, latest: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Option<f64>>,
    {
        let stop = match stop {
            StopTime::At(ts) => ts,
            StopTime::Now => now(),
            StopTime::Last => latest()?.ok_or(TrackError::EmptyLog)?,
        };
        Ok(ReplayWindow {
            start: stop - window,
            stop,
        })
    }
}

/// Rebuild an airspace by applying `records` in the order given.
pub fn replay<I>(records: I) -> Airspace
where
    I: IntoIterator<Item = EventRecord>,
{
    replay_into(Airspace::new(), records)
}

/// Like [`replay`], but starting from a caller-configured empty registry
/// (e.g. one with history capture enabled).
pub fn replay_into<I>(mut airspace: Airspace, records: I) -> Airspace
where
    I: IntoIterator<Item = EventRecord>,
{
    let mut applied = 0u64;
    for record in records {
        airspace.apply(&record);
        applied += 1;
    }
    tracing::debug!(records = applied, aircraft = airspace.len(), "replay complete");
    airspace
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Identity, Position};

    fn pos_event(ts: f64, addr: &str, alt: i32) -> EventRecord {
        EventRecord::position(
            ts,
            addr,
            Position {
                latitude: 34.0,
                longitude: -118.0,
                altitude: alt,
                altitude_src: AltitudeSource::Baro,
            },
        )
    }

    #[test]
    fn test_parse_stop_numeric() {
        assert_eq!("130".parse::<StopTime>().unwrap(), StopTime::At(130.0));
        assert_eq!("1700000000.5".parse::<StopTime>().unwrap(), StopTime::At(1_700_000_000.5));
    }

    #[test]
    fn test_parse_stop_sentinels() {
        assert_eq!("last".parse::<StopTime>().unwrap(), StopTime::Last);
        assert_eq!("LAST".parse::<StopTime>().unwrap(), StopTime::Last);
        assert_eq!(" last ".parse::<StopTime>().unwrap(), StopTime::Last);
    }

    #[test]
    fn test_parse_stop_iso_with_offset() {
        assert_eq!(
            "2023-11-14T22:13:20Z".parse::<StopTime>().unwrap(),
            StopTime::At(1_700_000_000.0)
        );
        assert_eq!(
            "2023-11-14T23:13:20+01:00".parse::<StopTime>().unwrap(),
            StopTime::At(1_700_000_000.0)
        );
        assert_eq!(
            "2023-11-14T22:13:20.5Z".parse::<StopTime>().unwrap(),
            StopTime::At(1_700_000_000.5)
        );
    }

    #[test]
    fn test_parse_stop_naive_is_local_time() {
        // POSIX rule string: no zoneinfo files needed. The only test that
        // reads the local zone, so changing TZ here races with nothing.
        let saved = std::env::var("TZ").ok();
        std::env::set_var("TZ", "PST8PDT,M3.2.0,M11.1.0");

        let parsed = [
            "2023-11-14T14:13:20".parse::<StopTime>(),
            "2023-11-14 14:13:20.5".parse::<StopTime>(),
            "1970-01-02".parse::<StopTime>(),
        ];

        match saved {
            Some(tz) => std::env::set_var("TZ", tz),
            None => std::env::remove_var("TZ"),
        }

        assert_eq!(parsed[0].as_ref().unwrap(), &StopTime::At(1_700_000_000.0));
        assert_eq!(parsed[1].as_ref().unwrap(), &StopTime::At(1_700_000_000.5));
        assert_eq!(parsed[2].as_ref().unwrap(), &StopTime::At(86_400.0 + 8.0 * 3600.0));
    }

    #[test]
    fn test_parse_stop_garbage() {
        for bad in ["yesterday", "", "now", "NOW", "12:00", "NaN", "inf"] {
            assert!(
                matches!(bad.parse::<StopTime>(), Err(TrackError::TimeParse(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_window_absolute() {
        let w = ReplayWindow::resolve(StopTime::At(100.0), 60.0, || unreachable!()).unwrap();
        assert_eq!(w, ReplayWindow { start: 40.0, stop: 100.0 });
    }

    #[test]
    fn test_window_last() {
        let w = ReplayWindow::resolve(StopTime::Last, DEFAULT_WINDOW, || Ok(Some(130.0))).unwrap();
        assert_eq!(w.start, 70.0);
        assert_eq!(w.stop, 130.0);
    }

    #[test]
    fn test_window_last_empty_log() {
        let err = ReplayWindow::resolve(StopTime::Last, 60.0, || Ok(None)).unwrap_err();
        assert!(matches!(err, TrackError::EmptyLog));
    }

    #[test]
    fn test_window_now() {
        let before = now();
        let w = ReplayWindow::resolve(StopTime::Now, 10.0, || unreachable!()).unwrap();
        assert!(w.stop >= before);
        assert_eq!(w.stop - w.start, 10.0);
    }

    #[test]
    fn test_replay_builds_airspace() {
        let records = vec![
            pos_event(10.0, "A1B2C3", 1000),
            EventRecord::identity(
                11.0,
                "a1b2c3",
                Identity {
                    callsign: "N12345".into(),
                    type_code: 4,
                    category: 1,
                },
            ),
            pos_event(12.0, "4840D6", 38000),
            pos_event(20.0, "A1B2C3", 2000),
        ];
        let airspace = replay(records);

        assert_eq!(airspace.len(), 2);
        let ac = airspace.get("A1B2C3").unwrap();
        assert_eq!(ac.position().unwrap().value.altitude, 2000);
        assert_eq!(ac.identity().unwrap().value.callsign, "N12345");
        assert_eq!(ac.last_update(), Some(20.0));
    }

    #[test]
    fn test_replay_matches_live_application() {
        let records = vec![
            pos_event(1.0, "AAAAAA", 100),
            pos_event(2.0, "BBBBBB", 200),
            pos_event(3.0, "AAAAAA", 300),
        ];
        let mut live = Airspace::new();
        for r in &records {
            live.apply(r);
        }
        assert_eq!(replay(records).all(), live.all());
    }

    #[test]
    fn test_replay_into_keeps_history_setting() {
        let records = (0..5).map(|i| pos_event(i as f64, "AAAAAA", i * 10));
        let airspace = replay_into(Airspace::with_history(3), records);
        assert_eq!(airspace.get("AAAAAA").unwrap().position_history().count(), 3);
    }

    #[test]
    fn test_replay_empty() {
        assert!(replay(Vec::new()).is_empty());
    }
}
