use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::rent::DEFAULT_HOURLY_RATE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load .env: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

/// Server settings, read from `PARKWAY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub hourly_rate: u64,
    pub drain_sweep: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            hourly_rate: DEFAULT_HOURLY_RATE,
            drain_sweep: Duration::from_secs(5),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load `.env` if there is one, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let sweep_secs: u64 = parse_or("PARKWAY_DRAIN_SWEEP_SECS", &lookup, defaults.drain_sweep.as_secs())?;
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PARKWAY_DRAIN_SWEEP_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self {
            bind: parse_or("PARKWAY_BIND", &lookup, defaults.bind)?,
            port: parse_or("PARKWAY_PORT", &lookup, defaults.port)?,
            data_dir: lookup("PARKWAY_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_connections: parse_or("PARKWAY_MAX_CONNECTIONS", &lookup, defaults.max_connections)?,
            compact_threshold: parse_or("PARKWAY_COMPACT_THRESHOLD", &lookup, defaults.compact_threshold)?,
            hourly_rate: parse_or("PARKWAY_HOURLY_RATE", &lookup, defaults.hourly_rate)?,
            drain_sweep: Duration::from_secs(sweep_secs),
            metrics_port: parse_opt("PARKWAY_METRICS_PORT", &lookup)?,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port.map(|port| SocketAddr::new(self.bind, port))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkway.wal")
    }
}

fn parse_opt<T>(key: &'static str, lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
}

fn parse_or<T>(key: &'static str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(key, lookup)?.unwrap_or(default))
}
