//! Process configuration, read once from `FIELDSLOT_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{EngineSettings, VenueClock};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub hold_minutes: i64,
    pub reaper: ReaperSettings,
    /// Venue offset from UTC; decides where "today" starts.
    pub utc_offset_minutes: i32,
    /// Origin the payment callbacks point back to.
    pub base_url: String,
}

/// How the expiry reaper paces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperSettings {
    pub interval: Duration,
    pub startup_delay: Duration,
    pub batch: usize,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            startup_delay: Duration::from_secs(10),
            batch: 100,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "fieldslot".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            hold_minutes: 10,
            reaper: ReaperSettings::default(),
            utc_offset_minutes: 8 * 60,
            base_url: "http://localhost:3000".into(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("{key}={raw:?} is not valid, using default");
                default
            }
        },
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            port: parsed(&lookup, "FIELDSLOT_PORT", d.port),
            bind: lookup("FIELDSLOT_BIND").unwrap_or(d.bind),
            data_dir: lookup("FIELDSLOT_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("FIELDSLOT_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "FIELDSLOT_MAX_CONNECTIONS", d.max_connections).max(1),
            compact_threshold: parsed(&lookup, "FIELDSLOT_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: lookup("FIELDSLOT_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            tls_cert: lookup("FIELDSLOT_TLS_CERT"),
            tls_key: lookup("FIELDSLOT_TLS_KEY"),
            hold_minutes: parsed(&lookup, "FIELDSLOT_HOLD_MINUTES", d.hold_minutes).max(1),
            reaper: ReaperSettings {
                interval: Duration::from_secs(
                    parsed(&lookup, "FIELDSLOT_REAPER_INTERVAL_SECS", 60u64).max(1),
                ),
                startup_delay: Duration::from_secs(parsed(
                    &lookup,
                    "FIELDSLOT_REAPER_STARTUP_DELAY_SECS",
                    10u64,
                )),
                batch: parsed(&lookup, "FIELDSLOT_REAPER_BATCH", d.reaper.batch).max(1),
            },
            utc_offset_minutes: parsed(&lookup, "FIELDSLOT_UTC_OFFSET_MINUTES", d.utc_offset_minutes)
                .clamp(-14 * 60, 14 * 60),
            base_url: lookup("FIELDSLOT_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(d.base_url),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hold_ttl_ms: self.hold_minutes * 60_000,
            clock: VenueClock::new(self.utc_offset_minutes),
            base_url: self.base_url.clone(),
        }
    }
}
