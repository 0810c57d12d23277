use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::LinkagePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("COACHBOOK_LINKAGE: {0}")]
    Linkage(String),
}

/// Process settings, read once from `COACHBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub linkage: LinkagePolicy,
    /// JSON file of users and transactions loaded into the directory.
    pub seed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            linkage: LinkagePolicy::Overwrite,
            seed: None,
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { var, value, expected })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let linkage = match lookup("COACHBOOK_LINKAGE") {
            Some(raw) => raw.parse::<LinkagePolicy>().map_err(ConfigError::Linkage)?,
            None => defaults.linkage,
        };
        Ok(Self {
            bind: parsed(&lookup, "COACHBOOK_BIND", "IP address")?.unwrap_or(defaults.bind),
            port: parsed(&lookup, "COACHBOOK_PORT", "port")?.unwrap_or(defaults.port),
            data_dir: lookup("COACHBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            metrics_port: parsed(&lookup, "COACHBOOK_METRICS_PORT", "port")?,
            compact_threshold: parsed(&lookup, "COACHBOOK_COMPACT_THRESHOLD", "event count")?
                .unwrap_or(defaults.compact_threshold),
            linkage,
            seed: lookup("COACHBOOK_SEED").map(PathBuf::from),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("coachbook.wal")
    }
}
