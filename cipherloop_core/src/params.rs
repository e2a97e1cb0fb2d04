//! Security parameters ("theta") steering key derivation strength.

use log::debug;
use serde::{Deserialize, Serialize};

/// Scalar knobs for one encryption cycle. Every component lives in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SecurityParameters {
    pub entropy: f64,
    pub cipher_strength: f64,
    pub role_decay: f64,
}

impl SecurityParameters {
    /// Builds a parameter set, clamping each component into `[0, 1]`.
    pub fn new(entropy: f64, cipher_strength: f64, role_decay: f64) -> Self {
        let clamped = Self {
            entropy: clamp_unit(entropy),
            cipher_strength: clamp_unit(cipher_strength),
            role_decay: clamp_unit(role_decay),
        };
        if clamped.entropy != entropy
            || clamped.cipher_strength != cipher_strength
            || clamped.role_decay != role_decay
        {
            debug!(
                "clamped out-of-range parameters entropy={} cipher_strength={} role_decay={}",
                entropy, cipher_strength, role_decay
            );
        }
        clamped
    }

    /// Re-applies the `[0, 1]` bounds. Fields are public, so a literal can
    /// hold anything; consumers that size buffers or loops from theta go
    /// through this first.
    pub fn clamped(self) -> Self {
        Self::new(self.entropy, self.cipher_strength, self.role_decay)
    }

    /// Component-wise maximum. Used when merging concurrent calibrations.
    pub fn max(self, other: Self) -> Self {
        Self {
            entropy: self.entropy.max(other.entropy),
            cipher_strength: self.cipher_strength.max(other.cipher_strength),
            role_decay: self.role_decay.max(other.role_decay),
        }
    }

    /// Adds `step` to every component, saturating at 1.0.
    pub fn raised_by(self, step: f64) -> Self {
        Self::new(
            self.entropy + step,
            self.cipher_strength + step,
            self.role_decay + step,
        )
    }

    /// True when no component of `self` is below the matching one in `other`.
    pub fn dominates(&self, other: &Self) -> bool {
        self.entropy >= other.entropy
            && self.cipher_strength >= other.cipher_strength
            && self.role_decay >= other.role_decay
    }

    /// Parameters quantized to thousandths, the form mixed into derivation
    /// salts and integrity proofs.
    pub fn quantized(&self) -> [u16; 3] {
        [
            quantize(self.entropy),
            quantize(self.cipher_strength),
            quantize(self.role_decay),
        ]
    }

    pub fn to_bytes(&self) -> [u8; 6] {
        let q = self.quantized();
        let mut out = [0u8; 6];
        out[..2].copy_from_slice(&q[0].to_le_bytes());
        out[2..4].copy_from_slice(&q[1].to_le_bytes());
        out[4..].copy_from_slice(&q[2].to_le_bytes());
        out
    }
}

impl Default for SecurityParameters {
    fn default() -> Self {
        Self {
            entropy: 0.5,
            cipher_strength: 0.8,
            role_decay: 0.5,
        }
    }
}

// Deserialization goes through `new` so external overrides are clamped too.
impl<'de> Deserialize<'de> for SecurityParameters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            entropy: f64,
            cipher_strength: f64,
            role_decay: f64,
        }
        let helper = Helper::deserialize(deserializer)?;
        Ok(Self::new(
            helper.entropy,
            helper.cipher_strength,
            helper.role_decay,
        ))
    }
}

/// A parameter value paired with the store version it was read at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThetaSnapshot {
    pub version: u64,
    pub params: SecurityParameters,
}

impl ThetaSnapshot {
    pub fn new(version: u64, params: SecurityParameters) -> Self {
        Self { version, params }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn quantize(value: f64) -> u16 {
    (clamp_unit(value) * 1000.0).round() as u16
}
