//! Configuration file management for adsb-track.
//!
//! Reads/writes `~/.adsb-track/config.yaml` with the reference station,
//! event log location, commit buffer, stream source, and status dashboard.
//! `ADSB_LATITUDE` / `ADSB_LONGITUDE` override the station position.

use std::path::PathBuf;

use crate::types::TrackError;

/// Default number of appends between automatic commits.
pub const DEFAULT_BUFFER: usize = 25;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub database: DatabaseConfig,
    pub stream: StreamConfig,
    pub dashboard: DashboardConfig,
}

/// Reference ground station. Only the decoder needs the position.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
    pub buffer: usize,
}

/// Where decoded frames come from; also the session fingerprint inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receiver: ReceiverConfig {
                name: "default".into(),
                lat: None,
                lon: None,
            },
            database: DatabaseConfig {
                path: "data/adsb-track.db".into(),
                buffer: DEFAULT_BUFFER,
            },
            stream: StreamConfig {
                host: "localhost".into(),
                port: 30005,
                protocol: "beast".into(),
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
        }
    }
}

/// Get the config directory path (`~/.adsb-track/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".adsb-track")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.adsb-track/config.yaml`, then apply env overrides.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    let path = config_file();
    let mut config = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| parse_config(&text))
        .unwrap_or_default();
    apply_env(&mut config, |key| std::env::var(key).ok());
    config
}

/// Save config to `~/.adsb-track/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, TrackError> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).map_err(|e| TrackError::Config(e.to_string()))?;

    let path = config_file();
    let text = serialize_config(config);
    std::fs::write(&path, text).map_err(|e| TrackError::Config(e.to_string()))?;

    Ok(path)
}

fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(lat) = var("ADSB_LATITUDE").and_then(|v| parse_float_value(&v)) {
        config.receiver.lat = Some(lat);
    }
    if let Some(lon) = var("ADSB_LONGITUDE").and_then(|v| parse_float_value(&v)) {
        config.receiver.lon = Some(lon);
    }
}

/// Parse simple YAML-like config text.
fn parse_config(text: &str) -> Option<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }

        match (current_section.as_deref(), key) {
            (Some("receiver"), "name") => {
                if let Some(v) = parse_string_value(val) {
                    config.receiver.name = v;
                }
            }
            (Some("receiver"), "lat") => config.receiver.lat = parse_float_value(val),
            (Some("receiver"), "lon") => config.receiver.lon = parse_float_value(val),
            (Some("database"), "path") => {
                if let Some(v) = parse_string_value(val) {
                    config.database.path = v;
                }
            }
            (Some("database"), "buffer") => {
                if let Some(v) = val.parse::<usize>().ok().filter(|&n| n > 0) {
                    config.database.buffer = v;
                }
            }
            (Some("stream"), "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.stream.host = v;
                }
            }
            (Some("stream"), "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.stream.port = v;
                }
            }
            (Some("stream"), "protocol") => {
                if let Some(v) = parse_string_value(val) {
                    config.stream.protocol = v;
                }
            }
            (Some("dashboard"), "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.dashboard.host = v;
                }
            }
            (Some("dashboard"), "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.dashboard.port = v;
                }
            }
            _ => {}
        }
    }

    Some(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "null".into());

    let lines = [
        "# adsb-track configuration".to_string(),
        String::new(),
        "receiver:".into(),
        format!("  name: \"{}\"", config.receiver.name),
        format!("  lat: {}", opt(config.receiver.lat)),
        format!("  lon: {}", opt(config.receiver.lon)),
        String::new(),
        "database:".into(),
        format!("  path: \"{}\"", config.database.path),
        format!("  buffer: {}", config.database.buffer),
        String::new(),
        "stream:".into(),
        format!("  host: \"{}\"", config.stream.host),
        format!("  port: {}", config.stream.port),
        format!("  protocol: \"{}\"", config.stream.protocol),
        String::new(),
        "dashboard:".into(),
        format!("  host: \"{}\"", config.dashboard.host),
        format!("  port: {}", config.dashboard.port),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
