use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibrator::CalibratorConfig;
use crate::epoch::{DEFAULT_EPOCH_WINDOW_SECS, EpochWindow};
use crate::mimic::DEFAULT_SEEN_TAG_CAPACITY;
use crate::params::SecurityParameters;
use crate::preset::{SecurityLevel, security_preset};
use crate::scorer::ScorerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything an orchestrator needs besides its root key.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub epoch_window_secs: u64,
    pub initial: SecurityParameters,
    pub calibrator: CalibratorConfig,
    pub scorer: ScorerConfig,
    /// Exact tags the attacker grammar remembers before forgetting the oldest.
    pub seen_tag_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            epoch_window_secs: DEFAULT_EPOCH_WINDOW_SECS,
            initial: SecurityParameters::default(),
            calibrator: CalibratorConfig::default(),
            scorer: ScorerConfig::default(),
            seen_tag_capacity: DEFAULT_SEEN_TAG_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_preset(level: SecurityLevel) -> Self {
        let preset = security_preset(level);
        Self {
            epoch_window_secs: preset.epoch_window_secs,
            initial: preset.initial,
            calibrator: preset.calibrator,
            scorer: ScorerConfig::default(),
            seen_tag_capacity: DEFAULT_SEEN_TAG_CAPACITY,
        }
    }

    /// Loads and validates a JSON config. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "epoch_window_secs must be positive".into(),
            ));
        }
        if self.seen_tag_capacity == 0 {
            return Err(ConfigError::Invalid(
                "seen_tag_capacity must be positive".into(),
            ));
        }
        self.calibrator.validate()?;
        self.scorer.validate()
    }

    pub fn epoch_window(&self) -> EpochWindow {
        EpochWindow::new(self.epoch_window_secs)
    }
}
