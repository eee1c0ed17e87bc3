use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from `BOOKINGS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Bound on every storage call made by the core.
    pub op_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub mail_from: String,
    /// Receives a notice for every new reservation.
    pub owner_email: String,
    pub mail_queue_capacity: usize,
    /// Compact the WAL once this many frames were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    /// Rooms created on first start when the catalog is empty.
    pub seed_rooms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            op_timeout: Duration::from_secs(3),
            metrics_port: None,
            mail_from: "me@here.com".into(),
            owner_email: "owner@here.com".into(),
            mail_queue_capacity: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            seed_rooms: vec!["General's Quarters".into(), "Major's Suite".into()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.parse::<u64>().ok());

        Self {
            data_dir: lookup("BOOKINGS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            op_timeout: parse_u64("BOOKINGS_OP_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.op_timeout),
            metrics_port: lookup("BOOKINGS_METRICS_PORT").and_then(|s| s.parse().ok()),
            mail_from: lookup("BOOKINGS_MAIL_FROM").unwrap_or(defaults.mail_from),
            owner_email: lookup("BOOKINGS_OWNER_EMAIL").unwrap_or(defaults.owner_email),
            mail_queue_capacity: parse_u64("BOOKINGS_MAIL_QUEUE")
                .map(|n| n as usize)
                .unwrap_or(defaults.mail_queue_capacity),
            compact_threshold: parse_u64("BOOKINGS_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parse_u64("BOOKINGS_COMPACT_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            seed_rooms: lookup("BOOKINGS_SEED_ROOMS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.seed_rooms),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
