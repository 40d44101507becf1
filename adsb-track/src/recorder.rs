//! Producer path: apply each decoded event to the live airspace, then log it.
//!
//! One `Recorder` owns the log writer. The airspace handle is shared, so a
//! status reader can snapshot it while events are being ingested.

use adsb_track_core::airspace::SharedAirspace;
use adsb_track_core::event::EventRecord;
use adsb_track_core::types::*;

use crate::db::{BufferedLog, EventLog, EventSink};

/// Counters for one recording run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecorderStats {
    pub events: u64,
    pub duplicates: u64,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
}

impl RecorderStats {
    /// Lowest and highest logged event timestamps, if anything was logged.
    pub fn span(&self) -> Option<(f64, f64)> {
        self.first_timestamp.zip(self.last_timestamp)
    }

    fn logged(&mut self, timestamp: f64) {
        self.events += 1;
        self.first_timestamp = Some(self.first_timestamp.map_or(timestamp, |t| t.min(timestamp)));
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));
    }
}

pub struct Recorder<S: EventSink> {
    airspace: SharedAirspace,
    log: BufferedLog<S>,
    skip_duplicates: bool,
    stats: RecorderStats,
    // Span last written to the open session row.
    synced_span: Option<(f64, f64)>,
}

impl<S: EventSink> Recorder<S> {
    pub fn new(airspace: SharedAirspace, log: BufferedLog<S>) -> Self {
        Recorder {
            airspace,
            log,
            skip_duplicates: false,
            stats: RecorderStats::default(),
            synced_span: None,
        }
    }

    /// Log and skip duplicate records instead of failing on them.
    pub fn skip_duplicates(mut self, skip: bool) -> Self {
        self.skip_duplicates = skip;
        self
    }

    pub fn airspace(&self) -> &SharedAirspace {
        &self.airspace
    }

    pub fn log(&self) -> &BufferedLog<S> {
        &self.log
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    /// In-memory update first, then the durable append.
    pub fn ingest(&mut self, record: &EventRecord) -> Result<()> {
        self.airspace.apply(record);
        match self.log.append(record) {
            Ok(()) => {
                self.stats.logged(record.timestamp());
                Ok(())
            }
            Err(e) if e.is_duplicate() && self.skip_duplicates => {
                tracing::warn!("skipping {e}");
                self.stats.duplicates += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Commit whatever is buffered without ending the run.
    pub fn commit(&mut self) -> Result<()> {
        self.log.commit()
    }

    /// Final commit; hands back the run's counters.
    pub fn finish(self) -> Result<RecorderStats> {
        let stats = self.stats;
        self.log.close()?;
        Ok(stats)
    }
}

impl Recorder<EventLog> {
    /// After a commit, write the span of this run's durable records to the
    /// open session row, so a run that dies before `close_session` can still
    /// be replayed by fingerprint.
    pub fn sync_session(&mut self, fingerprint: &str) -> Result<()> {
        let span = self.stats.span();
        if self.log.pending() > 0 || span.is_none() || span == self.synced_span {
            return Ok(());
        }
        if let Some(span) = span {
            self.log.sink_mut().update_session_span(fingerprint, span)?;
        }
        self.synced_span = span;
        Ok(())
    }

    /// Mark the session closed with the span of timestamps this run logged.
    ///
    /// The update rides in the current transaction; `finish` commits it.
    pub fn close_session(&mut self, fingerprint: &str, end_time: f64) -> Result<()> {
        let span = self.stats.span();
        self.log.sink_mut().end_session(fingerprint, end_time, span)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
