//! TOML configuration.
//!
//! `[engine]` is read loosely into [`EngineSettings`] and then validated
//! once into the immutable [`EngineConfig`] that the processor carries.
//! `[storage]` and `[server]` are plain settings with defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::baseline::LAST_UPDATED_KEY;
use crate::detect::{DetectionMode, ForestParams};
use crate::pipeline::ScoringOrder;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SENSORBASE_CONFIG";
/// Config file picked up from the working directory when present.
pub const LOCAL_CONFIG: &str = "sensorbase.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one channel must be configured")]
    NoChannels,

    #[error("channel names must not be empty")]
    EmptyChannelName,

    #[error("channel '{0}' is configured more than once")]
    DuplicateChannel(String),

    #[error("channel name '{0}' is reserved by the baseline snapshot")]
    ReservedChannel(String),

    #[error("z_threshold must be a finite number above 0, got {0}")]
    InvalidThreshold(f64),

    #[error("contamination must lie strictly between 0 and 1, got {0}")]
    InvalidContamination(f64),

    #[error("maturity_floor must be at least 2, got {0}")]
    InvalidMaturityFloor(u64),

    #[error("invalid forest parameters: {0}")]
    InvalidForest(String),

    #[error("max_commit_attempts must be at least 1")]
    InvalidCommitAttempts,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (a `--config` flag); failure to load it is an error.
    /// 2. The file named by `SENSORBASE_CONFIG`.
    /// 3. `./sensorbase.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SENSORBASE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }

        debug!("No config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Validated engine parameters.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        EngineConfig::try_from(self.engine.clone())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// `[engine]` as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Channel names, in output column order.
    pub channels: Vec<String>,
    /// Z-scores strictly above this are flagged.
    pub z_threshold: f64,
    /// Expected anomaly proportion for the multivariate estimator.
    pub contamination: f64,
    /// Observations needed before a channel's z-scores are trusted.
    pub maturity_floor: u64,
    pub mode: DetectionMode,
    pub scoring_order: ScoringOrder,
    /// Baseline commit attempts before giving up on a contended batch.
    pub max_commit_attempts: u32,
    pub forest: ForestParams,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            channels: ["temperature", "humidity", "pressure", "wind_speed"]
                .into_iter()
                .map(String::from)
                .collect(),
            z_threshold: 3.0,
            contamination: 0.05,
            maturity_floor: 30,
            mode: DetectionMode::Both,
            scoring_order: ScoringOrder::UpdateBeforeScore,
            max_commit_attempts: 5,
            forest: ForestParams::default(),
        }
    }
}

/// Engine parameters after validation. Built once at startup and shared
/// read-only from then on.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    channels: Vec<String>,
    z_threshold: f64,
    contamination: f64,
    maturity_floor: u64,
    mode: DetectionMode,
    scoring_order: ScoringOrder,
    forest: ForestParams,
    max_commit_attempts: u32,
}

impl EngineConfig {
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn z_threshold(&self) -> f64 {
        self.z_threshold
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn maturity_floor(&self) -> u64 {
        self.maturity_floor
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn scoring_order(&self) -> ScoringOrder {
        self.scoring_order
    }

    pub fn forest(&self) -> ForestParams {
        self.forest
    }

    pub fn max_commit_attempts(&self) -> u32 {
        self.max_commit_attempts
    }

    pub fn with_mode(mut self, mode: DetectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scoring_order(mut self, order: ScoringOrder) -> Self {
        self.scoring_order = order;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let s = EngineSettings::default();
        Self {
            channels: s.channels,
            z_threshold: s.z_threshold,
            contamination: s.contamination,
            maturity_floor: s.maturity_floor,
            mode: s.mode,
            scoring_order: s.scoring_order,
            forest: s.forest,
            max_commit_attempts: s.max_commit_attempts,
        }
    }
}

impl TryFrom<EngineSettings> for EngineConfig {
    type Error = ConfigError;

    fn try_from(s: EngineSettings) -> Result<Self, Self::Error> {
        if s.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        let mut seen = HashSet::new();
        for name in &s.channels {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyChannelName);
            }
            if name == LAST_UPDATED_KEY {
                return Err(ConfigError::ReservedChannel(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateChannel(name.clone()));
            }
        }
        if !s.z_threshold.is_finite() || s.z_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(s.z_threshold));
        }
        if !(s.contamination > 0.0 && s.contamination < 1.0) {
            return Err(ConfigError::InvalidContamination(s.contamination));
        }
        if s.maturity_floor < 2 {
            return Err(ConfigError::InvalidMaturityFloor(s.maturity_floor));
        }
        if s.forest.n_trees == 0 {
            return Err(ConfigError::InvalidForest("n_trees must be at least 1".into()));
        }
        if s.forest.max_samples < 2 {
            return Err(ConfigError::InvalidForest("max_samples must be at least 2".into()));
        }
        if s.max_commit_attempts == 0 {
            return Err(ConfigError::InvalidCommitAttempts);
        }

        Ok(Self {
            channels: s.channels,
            z_threshold: s.z_threshold,
            contamination: s.contamination,
            maturity_floor: s.maturity_floor,
            mode: s.mode,
            scoring_order: s.scoring_order,
            forest: s.forest,
            max_commit_attempts: s.max_commit_attempts,
        })
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the object store holding raw and processed batches.
    pub data_dir: PathBuf,
    /// SQLite database holding the baseline.
    pub db_path: PathBuf,
    /// Key the baseline table is stored under.
    pub baseline_key: String,
    pub raw_prefix: String,
    pub processed_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_path: PathBuf::from("data/sensorbase.db"),
            baseline_key: "state/baseline.json".to_string(),
            raw_prefix: "raw/".to_string(),
            processed_prefix: "processed/".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
