use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::params::SecurityParameters;
use crate::scorer::LeakageAssessment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    Maintain,
    Recalibrate,
    AggressiveRecalibrate,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThetaUpdate {
    pub params: SecurityParameters,
    pub mode: CalibrationMode,
    pub propagate: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub aggressive_step: f64,
    pub gentle_step: f64,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.4,
            low_threshold: 0.15,
            aggressive_step: 0.2,
            gentle_step: 0.05,
        }
    }
}

impl CalibratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 <= self.low_threshold
            && self.low_threshold <= self.high_threshold
            && self.high_threshold <= 1.0;
        if !ordered {
            return Err(ConfigError::Invalid(format!(
                "calibrator thresholds must satisfy 0 <= low ({}) <= high ({}) <= 1",
                self.low_threshold, self.high_threshold
            )));
        }
        for (name, step) in [
            ("aggressive_step", self.aggressive_step),
            ("gentle_step", self.gentle_step),
        ] {
            if !step.is_finite() || step < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be finite and non-negative, got {step}"
                )));
            }
        }
        Ok(())
    }
}

/// Threshold state machine mapping a leakage score to a parameter update.
///
/// Parameters only ever move up here; relaxing them is an explicit store
/// operation outside the loop.
#[derive(Clone, Debug, Default)]
pub struct Calibrator {
    config: CalibratorConfig,
}

impl Calibrator {
    pub fn new(config: CalibratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    pub fn mode_for(&self, leakage_score: f64) -> CalibrationMode {
        if leakage_score >= self.config.high_threshold {
            CalibrationMode::AggressiveRecalibrate
        } else if leakage_score >= self.config.low_threshold {
            CalibrationMode::Recalibrate
        } else {
            CalibrationMode::Maintain
        }
    }

    pub fn calibrate(
        &self,
        assessment: &LeakageAssessment,
        current: SecurityParameters,
    ) -> ThetaUpdate {
        let current = current.clamped();
        let mode = self.mode_for(assessment.leakage_score);
        let (params, propagate) = match mode {
            CalibrationMode::AggressiveRecalibrate => {
                (current.raised_by(self.config.aggressive_step), true)
            }
            CalibrationMode::Recalibrate => (current.raised_by(self.config.gentle_step), true),
            CalibrationMode::Maintain => (current, false),
        };
        debug!(
            "calibrate score={:.3} mode={:?} propagate={}",
            assessment.leakage_score, mode, propagate
        );
        ThetaUpdate {
            params: params.max(current),
            mode,
            propagate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessed(score: f64) -> LeakageAssessment {
        LeakageAssessment::from_score(score, 0.6)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn moderate_leak_triggers_aggressive_raise() {
        let current = SecurityParameters::default();
        let update = Calibrator::default().calibrate(&assessed(0.527), current);
        assert_eq!(update.mode, CalibrationMode::AggressiveRecalibrate);
        assert!(update.propagate);
        assert!(update.params.entropy > current.entropy);
        assert!(update.params.cipher_strength > current.cipher_strength);
        assert!(update.params.role_decay > current.role_decay);
        assert!(close(update.params.entropy, 0.7));
        assert!(close(update.params.cipher_strength, 1.0));
        assert!(close(update.params.role_decay, 0.7));
    }

    #[test]
    fn low_leak_maintains() {
        let current = SecurityParameters::default();
        let update = Calibrator::default().calibrate(&assessed(0.05), current);
        assert_eq!(update.mode, CalibrationMode::Maintain);
        assert!(!update.propagate);
        assert_eq!(update.params, current);
    }

    #[test]
    fn mid_band_recalibrates_gently() {
        let current = SecurityParameters::default();
        let update = Calibrator::default().calibrate(&assessed(0.2), current);
        assert_eq!(update.mode, CalibrationMode::Recalibrate);
        assert!(update.propagate);
        assert!(close(update.params.entropy, 0.55));
        assert!(close(update.params.cipher_strength, 0.85));
    }

    #[test]
    fn thresholds_are_inclusive_from_below() {
        let calibrator = Calibrator::default();
        assert_eq!(calibrator.mode_for(0.4), CalibrationMode::AggressiveRecalibrate);
        assert_eq!(calibrator.mode_for(0.15), CalibrationMode::Recalibrate);
        assert_eq!(calibrator.mode_for(0.1499), CalibrationMode::Maintain);
    }

    #[test]
    fn sustained_high_risk_converges_to_one() {
        let calibrator = Calibrator::default();
        let mut current = SecurityParameters::new(0.0, 0.1, 0.33);
        for step in 0..10 {
            let next = calibrator.calibrate(&assessed(0.4 + step as f64 * 0.05), current).params;
            assert!(next.dominates(&current));
            assert!(next.entropy <= 1.0 && next.cipher_strength <= 1.0 && next.role_decay <= 1.0);
            current = next;
        }
        assert_eq!(current, SecurityParameters::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn saturated_parameters_stay_put() {
        let top = SecurityParameters::new(1.0, 1.0, 1.0);
        let update = Calibrator::default().calibrate(&assessed(0.9), top);
        assert_eq!(update.params, top);
        assert!(update.propagate);
    }

    #[test]
    fn raw_out_of_range_input_never_escapes_unit_range() {
        let raw = SecurityParameters {
            entropy: 10.0,
            cipher_strength: -2.0,
            role_decay: f64::NAN,
        };
        let held = Calibrator::default().calibrate(&assessed(0.05), raw);
        assert_eq!(held.params, SecurityParameters::new(1.0, 0.0, 0.0));
        let raised = Calibrator::default().calibrate(&assessed(0.9), raw);
        assert!(close(raised.params.entropy, 1.0));
        assert!(close(raised.params.cipher_strength, 0.2));
        assert!(close(raised.params.role_decay, 0.2));
    }

    #[test]
    fn config_validation() {
        assert!(CalibratorConfig::default().validate().is_ok());
        let inverted = CalibratorConfig {
            high_threshold: 0.1,
            low_threshold: 0.3,
            ..CalibratorConfig::default()
        };
        assert!(inverted.validate().is_err());
        let negative = CalibratorConfig {
            gentle_step: -0.05,
            ..CalibratorConfig::default()
        };
        assert!(negative.validate().is_err());
    }
}
