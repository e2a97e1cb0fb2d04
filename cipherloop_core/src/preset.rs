use serde::{Deserialize, Serialize};

use crate::calibrator::CalibratorConfig;
use crate::epoch::DEFAULT_EPOCH_WINDOW_SECS;
use crate::params::SecurityParameters;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Toy,
    Standard,
    Paranoid,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SecurityPreset {
    pub level: SecurityLevel,
    pub initial: SecurityParameters,
    pub epoch_window_secs: u64,
    pub calibrator: CalibratorConfig,
}

pub fn security_preset(level: SecurityLevel) -> SecurityPreset {
    match level {
        SecurityLevel::Toy => SecurityPreset {
            level,
            initial: SecurityParameters::new(0.25, 0.5, 0.25),
            epoch_window_secs: 3 * DEFAULT_EPOCH_WINDOW_SECS,
            calibrator: CalibratorConfig {
                aggressive_step: 0.1,
                gentle_step: 0.02,
                ..CalibratorConfig::default()
            },
        },
        SecurityLevel::Standard => SecurityPreset {
            level,
            initial: SecurityParameters::default(),
            epoch_window_secs: DEFAULT_EPOCH_WINDOW_SECS,
            calibrator: CalibratorConfig::default(),
        },
        SecurityLevel::Paranoid => SecurityPreset {
            level,
            initial: SecurityParameters::new(0.8, 0.95, 0.8),
            epoch_window_secs: 60,
            calibrator: CalibratorConfig {
                high_threshold: 0.3,
                low_threshold: 0.1,
                aggressive_step: 0.25,
                gentle_step: 0.1,
            },
        },
    }
}
