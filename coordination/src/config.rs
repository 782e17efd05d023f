//! Runtime configuration
//!
//! Layering, lowest to highest: built-in defaults, an optional TOML file,
//! `COORD_*` environment variables, then CLI flags (applied by the binary).

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::council::{CouncilSettings, Electorate};
use crate::notify::CHANNEL_CAPACITY;
use crate::review::DEFAULT_REVIEWERS;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// Process-local; lost on exit
    Memory,
    /// One JSON document per scope under `state_dir`
    #[default]
    Json,
    /// RocksDB under `state_dir` (feature `heavy-state`)
    Rocks,
}

impl std::str::FromStr for StateBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "json" => Ok(Self::Json),
            "rocks" | "rocksdb" => Ok(Self::Rocks),
            other => Err(ConfigError::Invalid(format!("unknown backend {:?}", other))),
        }
    }
}

/// Coordination core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Root directory for persisted state
    pub state_dir: PathBuf,
    pub backend: StateBackend,
    /// Exactly three distinct council electors
    pub electorate: Vec<String>,
    pub voting_timeout_hours: u32,
    pub tie_break_hours: u32,
    /// Period of the background sweep
    pub sweep_interval_secs: u64,
    /// Broadcast notifier buffer
    pub channel_capacity: usize,
    /// Roster for tertiary reviewer selection
    pub reviewers: Vec<String>,
    /// Fixed seed for reviewer sampling; time-seeded when absent
    pub rng_seed: Option<u64>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".coordination"),
            backend: StateBackend::default(),
            electorate: Electorate::default().members().to_vec(),
            voting_timeout_hours: 48,
            tie_break_hours: 12,
            sweep_interval_secs: 60,
            channel_capacity: CHANNEL_CAPACITY,
            reviewers: DEFAULT_REVIEWERS.iter().map(|s| s.to_string()).collect(),
            rng_seed: None,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has malformed value {:?}", name, value)))
}

impl CoordinationConfig {
    /// Defaults overlaid with `COORD_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay variables resolved through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COORD_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("COORD_BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = lookup("COORD_ELECTORATE") {
            self.electorate = split_list(&v);
        }
        if let Some(v) = lookup("COORD_VOTING_TIMEOUT_HOURS") {
            self.voting_timeout_hours = parse_var("COORD_VOTING_TIMEOUT_HOURS", v)?;
        }
        if let Some(v) = lookup("COORD_TIE_BREAK_HOURS") {
            self.tie_break_hours = parse_var("COORD_TIE_BREAK_HOURS", v)?;
        }
        if let Some(v) = lookup("COORD_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_var("COORD_SWEEP_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("COORD_CHANNEL_CAPACITY") {
            self.channel_capacity = parse_var("COORD_CHANNEL_CAPACITY", v)?;
        }
        if let Some(v) = lookup("COORD_REVIEWERS") {
            self.reviewers = split_list(&v);
        }
        if let Some(v) = lookup("COORD_RNG_SEED") {
            self.rng_seed = Some(parse_var("COORD_RNG_SEED", v)?);
        }
        Ok(())
    }

    /// Reject configurations the core cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        Electorate::new(self.electorate.iter().cloned())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.voting_timeout_hours == 0 || self.tie_break_hours == 0 {
            return Err(ConfigError::Invalid(
                "voting and tie-break windows must be positive".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep interval must be positive".to_string()));
        }
        if self.reviewers.is_empty() {
            return Err(ConfigError::Invalid("reviewer roster is empty".to_string()));
        }
        if self.backend == StateBackend::Rocks && !cfg!(feature = "heavy-state") {
            return Err(ConfigError::Invalid(
                "rocks backend requires the heavy-state feature".to_string(),
            ));
        }
        Ok(())
    }

    /// Council timing and electorate
    pub fn council_settings(&self) -> Result<CouncilSettings, ConfigError> {
        let electorate = Electorate::new(self.electorate.iter().cloned())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(CouncilSettings {
            electorate,
            voting_timeout: Duration::hours(i64::from(self.voting_timeout_hours)),
            tie_break_window: Duration::hours(i64::from(self.tie_break_hours)),
        })
    }

    /// Sweep period
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}
