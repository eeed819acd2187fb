use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::model::MINUTE_MS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{name} must be greater than 0")]
    Zero { name: &'static str },
}

/// Server configuration read from `HOLDBOOK_*` environment variables.
///
/// | Env var                          | Default   |
/// |----------------------------------|-----------|
/// | `HOLDBOOK_BIND`                  | `0.0.0.0` |
/// | `HOLDBOOK_PORT`                  | `8080`    |
/// | `HOLDBOOK_DATA_DIR`              | `./data`  |
/// | `HOLDBOOK_METRICS_PORT`          | disabled  |
/// | `HOLDBOOK_HOLD_TTL_MINUTES`      | `30`      |
/// | `HOLDBOOK_SWEEP_INTERVAL_SECS`   | `300`     |
/// | `HOLDBOOK_COMPACT_THRESHOLD`     | `1000`    |
/// | `HOLDBOOK_CAPACITY_WINDOW_DAYS`  | `90`      |
/// | `HOLDBOOK_REQUEST_TIMEOUT_SECS`  | `10`      |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub hold_ttl_minutes: u64,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub capacity_window_days: u32,
    pub request_timeout: Duration,
}

/// How often the compactor checks the append count.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn positive(name: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { name });
    }
    Ok(value)
}

impl Config {
    /// Load from the process environment. A `.env` file, if present, is read first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let metrics_port = match lookup("HOLDBOOK_METRICS_PORT") {
            None => None,
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "HOLDBOOK_METRICS_PORT",
                value: raw,
            })?),
        };

        Ok(Self {
            bind: lookup("HOLDBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "HOLDBOOK_PORT", 8080)?,
            data_dir: lookup("HOLDBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port,
            hold_ttl_minutes: positive(
                "HOLDBOOK_HOLD_TTL_MINUTES",
                parse(&lookup, "HOLDBOOK_HOLD_TTL_MINUTES", 30)?,
            )?,
            sweep_interval: Duration::from_secs(positive(
                "HOLDBOOK_SWEEP_INTERVAL_SECS",
                parse(&lookup, "HOLDBOOK_SWEEP_INTERVAL_SECS", 300)?,
            )?),
            compact_threshold: parse(&lookup, "HOLDBOOK_COMPACT_THRESHOLD", 1000)?,
            capacity_window_days: parse(&lookup, "HOLDBOOK_CAPACITY_WINDOW_DAYS", 90)?,
            request_timeout: Duration::from_secs(positive(
                "HOLDBOOK_REQUEST_TIMEOUT_SECS",
                parse(&lookup, "HOLDBOOK_REQUEST_TIMEOUT_SECS", 10)?,
            )?),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("holdbook.wal")
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hold_ttl_ms: self.hold_ttl_minutes as i64 * MINUTE_MS,
            capacity_window_days: self.capacity_window_days,
        }
    }
}
