use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::clock::BusinessZone;
use crate::limits::DEFAULT_SYNC_INTERVAL_SECS;

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={:?}: {}", self.var, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Service settings, read from `LESSONBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub zone: BusinessZone,
    pub sync_interval: Duration,
    pub compact_threshold: u64,
    /// Endpoint secret for webhook signatures. Without it every webhook is
    /// rejected.
    pub webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let zone = match get("LESSONBOOK_UTC_OFFSET") {
            Some(raw) => BusinessZone::parse(&raw).ok_or_else(|| ConfigError {
                var: "LESSONBOOK_UTC_OFFSET",
                value: raw.clone(),
                reason: "expected +HH:MM, -HH:MM or Z".into(),
            })?,
            None => BusinessZone::default(),
        };

        let sync_secs: u64 =
            parsed(&get, "LESSONBOOK_SYNC_INTERVAL_SECS")?.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        if sync_secs == 0 {
            return Err(ConfigError {
                var: "LESSONBOOK_SYNC_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            bind: get("LESSONBOOK_BIND").unwrap_or_else(|| DEFAULT_BIND.into()),
            port: parsed(&get, "LESSONBOOK_PORT")?.unwrap_or(DEFAULT_PORT),
            data_dir: PathBuf::from(
                get("LESSONBOOK_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()),
            ),
            metrics_port: parsed(&get, "LESSONBOOK_METRICS_PORT")?,
            zone,
            sync_interval: Duration::from_secs(sync_secs),
            compact_threshold: parsed(&get, "LESSONBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
            webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("lessonbook.wal")
    }
}

fn parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = get(var) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })
}
