//! adsb-track: record decoded ADS-B events, replay the airspace, inspect the log.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use adsb_track_core::airspace::{Airspace, SharedAirspace};
use adsb_track_core::config::{self, Config};
use adsb_track_core::event::EventRecord;
use adsb_track_core::replay::{self, ReplayWindow, StopTime, DEFAULT_WINDOW};
use adsb_track_core::session::{self, Session};
use adsb_track_core::types::*;

mod db;
mod recorder;
mod status;
mod web;

use db::{BufferedLog, EventLog};
use recorder::Recorder;

/// Facet values kept per aircraft when printing a single track.
const TRACK_HISTORY: usize = 10_000;

/// Events queued between the input reader and the recorder.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "adsb-track", version, about = "ADS-B airspace tracker with a replayable event log")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record decoded events (JSON lines) into the event log
    Record {
        /// File of JSON-lines events, or "-" for stdin
        #[arg(default_value = "-")]
        input: PathBuf,

        /// SQLite event log path (defaults to the config file)
        #[arg(long, env = "ADSB_DB_PATH")]
        db_path: Option<String>,

        /// Appends between commits
        #[arg(long)]
        buffer: Option<usize>,

        /// Stream host the events came from
        #[arg(long)]
        host: Option<String>,

        /// Stream port the events came from
        #[arg(long)]
        port: Option<u16>,

        /// Stream protocol (raw, beast, avr)
        #[arg(long)]
        protocol: Option<String>,

        /// Seconds between status tables, 0 to disable
        #[arg(long, default_value = "0")]
        status_interval: u64,

        /// Warn and continue on duplicate records instead of stopping
        #[arg(long)]
        skip_duplicates: bool,

        /// Serve the status API while recording
        #[arg(long)]
        http: bool,

        /// Past values kept per aircraft facet
        #[arg(long, default_value = "0")]
        history: usize,
    },

    /// Reconstruct the airspace at a point in time from the event log
    Replay {
        /// SQLite event log path (defaults to the config file)
        #[arg(long, env = "ADSB_DB_PATH")]
        db_path: Option<String>,

        /// Epoch seconds, ISO-8601 datetime (local time unless it has an
        /// offset), or "last"; defaults to now
        #[arg(long)]
        stop: Option<String>,

        /// Seconds of history before the stop time
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        window: f64,

        /// Replay the records of one recording session instead
        #[arg(long, conflicts_with_all = ["stop", "window"])]
        session: Option<String>,

        /// Print one aircraft's position track instead of the airspace
        #[arg(long)]
        track: Option<String>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show event log statistics and recorded sessions
    Stats {
        /// SQLite event log path (defaults to the config file)
        #[arg(long, env = "ADSB_DB_PATH")]
        db_path: Option<String>,
    },

    /// Compute a session fingerprint
    Session {
        host: String,
        port: u16,
        protocol: String,

        /// Session start in epoch seconds (defaults to now)
        #[arg(long)]
        start: Option<f64>,
    },

    /// Show the active configuration
    Config {
        /// Write the active configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let config = config::load_config();

    let result = match cli.command {
        Commands::Record {
            input,
            db_path,
            buffer,
            host,
            port,
            protocol,
            status_interval,
            skip_duplicates,
            http,
            history,
        } => {
            let opts = RecordOptions {
                input,
                db_path: db_path.unwrap_or_else(|| config.database.path.clone()),
                buffer: buffer.unwrap_or(config.database.buffer),
                host: host.unwrap_or_else(|| config.stream.host.clone()),
                port: port.unwrap_or(config.stream.port),
                protocol: protocol.unwrap_or_else(|| config.stream.protocol.clone()),
                status_interval,
                skip_duplicates,
                http,
                history,
            };
            cmd_record(opts, &config)
        }
        Commands::Replay {
            db_path,
            stop,
            window,
            session,
            track,
            json,
        } => {
            let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
            cmd_replay(&db_path, stop.as_deref(), window, session.as_deref(), track.as_deref(), json)
        }
        Commands::Stats { db_path } => {
            let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
            cmd_stats(&db_path)
        }
        Commands::Session {
            host,
            port,
            protocol,
            start,
        } => {
            println!("{}", session::fingerprint(&host, port, &protocol, start.unwrap_or_else(replay::now)));
            Ok(())
        }
        Commands::Config { init } => cmd_config(&config, init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Log to stderr; `RUST_LOG` overrides the default `info` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// record
// ---------------------------------------------------------------------------

struct RecordOptions {
    input: PathBuf,
    db_path: String,
    buffer: usize,
    host: String,
    port: u16,
    protocol: String,
    status_interval: u64,
    skip_duplicates: bool,
    http: bool,
    history: usize,
}

fn open_input(input: &Path) -> Result<Box<dyn BufRead + Send>> {
    if input.to_str() == Some("-") {
        return Ok(Box::new(io::BufReader::new(io::stdin())));
    }
    let f = std::fs::File::open(input)?;
    Ok(Box::new(io::BufReader::new(f)))
}

/// Parse JSON-lines events on a blocking thread and feed them to the channel.
///
/// Returns once the input is exhausted or the receiver hangs up.
fn read_events(reader: Box<dyn BufRead + Send>, tx: mpsc::Sender<EventRecord>, malformed: Arc<AtomicU64>) {
    for (lineno, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("input read failed: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => {
                if tx.blocking_send(record).is_err() {
                    break;
                }
            }
            Err(e) => {
                malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(line = lineno + 1, "skipping malformed event: {e}");
            }
        }
    }
}

fn cmd_record(opts: RecordOptions, config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(record(opts, config))
}

async fn record(opts: RecordOptions, config: &Config) -> Result<()> {
    let reader = open_input(&opts.input)?;

    let mut log = EventLog::open(&opts.db_path)?;
    let session = Session::new(&opts.host, opts.port, &opts.protocol, replay::now());
    let fingerprint = log.start_session(&session)?;
    tracing::info!(
        session = %fingerprint,
        db = %opts.db_path,
        buffer = opts.buffer,
        "recording {}:{} ({})",
        opts.host,
        opts.port,
        opts.protocol
    );

    let airspace = SharedAirspace::new(Airspace::with_history(opts.history));
    let mut recorder = Recorder::new(airspace.clone(), BufferedLog::new(log, opts.buffer))
        .skip_duplicates(opts.skip_duplicates);

    if opts.http {
        let state = Arc::new(web::AppState {
            airspace: airspace.clone(),
            db_path: Some(opts.db_path.clone()),
            session: Some(fingerprint.clone()),
        });
        let host = config.dashboard.host.clone();
        let port = config.dashboard.port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(state, &host, port).await {
                tracing::error!("status API stopped: {e}");
            }
        });
    }

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let malformed = Arc::new(AtomicU64::new(0));
    {
        let malformed = malformed.clone();
        // Not joined: a reader blocked on stdin must not hold up shutdown.
        std::thread::spawn(move || read_events(reader, tx, malformed));
    }

    let period = Duration::from_secs(opts.status_interval.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut outcome = Ok(());
    let mut interrupted = false;

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(record) = next else { break };
                let ingested = recorder
                    .ingest(&record)
                    .and_then(|()| recorder.sync_session(&fingerprint));
                if let Err(e) = ingested {
                    outcome = Err(e);
                    break;
                }
            }
            _ = ticker.tick(), if opts.status_interval > 0 => {
                let stats = recorder.stats();
                println!();
                println!(
                    "{} events logged, {}/{} pending commit",
                    stats.events,
                    recorder.log().pending(),
                    recorder.log().threshold()
                );
                println!("{}", status::airspace_table(&recorder.airspace().all(), replay::now()));
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::info!("interrupted, draining queued events");
                interrupted = true;
                rx.close();
                let committed = recorder
                    .commit()
                    .and_then(|()| recorder.sync_session(&fingerprint));
                if let Err(e) = committed {
                    outcome = Err(e);
                    break;
                }
            }
        }
    }

    recorder.close_session(&fingerprint, replay::now())?;
    let stats = recorder.finish()?;
    outcome?;

    println!();
    println!("Session:    {fingerprint}");
    println!("Logged:     {}", stats.events);
    println!("Duplicates: {}", stats.duplicates);
    println!("Malformed:  {}", malformed.load(Ordering::Relaxed));
    status::print_airspace(&airspace.all(), stats.last_timestamp.unwrap_or_else(replay::now));
    Ok(())
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

fn cmd_replay(
    db_path: &str,
    stop: Option<&str>,
    window: f64,
    session: Option<&str>,
    track: Option<&str>,
    json: bool,
) -> Result<()> {
    let log = EventLog::open(db_path)?;

    let (records, reference) = match session {
        Some(fingerprint) => {
            let records = log.records_for_session(fingerprint)?;
            let reference = records.last().map(|r| r.timestamp());
            (records, reference)
        }
        None => {
            let stop = match stop {
                Some(s) => s.parse::<StopTime>()?,
                None => StopTime::Now,
            };
            let window = ReplayWindow::resolve(stop, window, || log.last_timestamp())?;
            tracing::debug!(start = window.start, stop = window.stop, "replaying window");
            (log.records_between(window.start, window.stop)?, Some(window.stop))
        }
    };
    let count = records.len();

    let history = if track.is_some() { TRACK_HISTORY } else { 0 };
    let airspace = replay::replay_into(Airspace::with_history(history), records);

    if let Some(address) = track {
        return print_track(&airspace, address, json);
    }

    let snapshot = airspace.all();
    if json {
        let text = serde_json::to_string_pretty(&snapshot).map_err(io::Error::from)?;
        println!("{text}");
    } else {
        println!("Replayed {count} records");
        status::print_airspace(&snapshot, reference.unwrap_or_else(replay::now));
    }
    Ok(())
}

fn print_track(airspace: &Airspace, address: &str, json: bool) -> Result<()> {
    let Some(state) = airspace.get(address) else {
        println!("No records for {}", Address::new(address));
        return Ok(());
    };

    if json {
        let track: Vec<_> = state.position_history().collect();
        let text = serde_json::to_string_pretty(&track).map_err(io::Error::from)?;
        println!("{text}");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Timestamp", "Lat", "Lon", "Alt (ft)", "Src"]);
    for facet in state.position_history() {
        table.add_row(vec![
            Cell::new(format!("{:.3}", facet.timestamp)),
            Cell::new(format!("{:.5}", facet.value.latitude)),
            Cell::new(format!("{:.5}", facet.value.longitude)),
            Cell::new(facet.value.altitude),
            Cell::new(facet.value.altitude_src),
        ]);
    }
    println!("Track: {}", state.address());
    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// stats / config
// ---------------------------------------------------------------------------

fn cmd_stats(db_path: &str) -> Result<()> {
    let log = EventLog::open(db_path)?;
    let stats = log.stats()?;
    let fmt_ts = |ts: Option<f64>| ts.map(|t| format!("{t:.3}")).unwrap_or_else(|| "-".into());

    println!();
    println!("Event log: {db_path}");
    println!();
    println!("  Aircraft:   {}", stats.aircraft);
    println!("  Identity:   {}", stats.identity);
    println!("  Position:   {}", stats.position);
    println!("  Velocity:   {}", stats.velocity);
    println!("  Sessions:   {}", stats.sessions);
    println!("  First:      {}", fmt_ts(stats.first_timestamp));
    println!("  Last:       {}", fmt_ts(stats.last_timestamp));
    println!();

    let sessions = log.sessions()?;
    if sessions.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Fingerprint", "Source", "Protocol", "Start", "End", "Records"]);
    for s in sessions {
        let records = match (s.first_record, s.last_record) {
            (Some(first), Some(last)) => format!("{first:.3} .. {last:.3}"),
            _ if s.end_time.is_none() => "open".into(),
            _ => "-".into(),
        };
        table.add_row(vec![
            Cell::new(&s.fingerprint[..12.min(s.fingerprint.len())]),
            Cell::new(format!("{}:{}", s.host, s.port)),
            Cell::new(&s.protocol),
            Cell::new(format!("{:.3}", s.start_time)),
            Cell::new(fmt_ts(s.end_time)),
            Cell::new(records),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> Result<()> {
    let fmt_coord = |c: Option<f64>| c.map(|v| v.to_string()).unwrap_or_else(|| "-".into());

    println!("Config file: {}", config::config_file().display());
    println!();
    println!("  Receiver:   {} ({}, {})", config.receiver.name, fmt_coord(config.receiver.lat), fmt_coord(config.receiver.lon));
    println!("  Event log:  {} (commit every {})", config.database.path, config.database.buffer);
    println!("  Stream:     {}:{} ({})", config.stream.host, config.stream.port, config.stream.protocol);
    println!("  Dashboard:  {}:{}", config.dashboard.host, config.dashboard.port);

    if init {
        let path = config::save_config(config)?;
        println!();
        println!("Wrote {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
