//! Leakage scoring: how much an attacker learns from tag shapes and mimicry.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::fields::SemanticFields;
use crate::mimic::{MimicRecord, TagGrammar, TagShape};
use crate::record::EncryptedRecord;

pub const ENTITY_RECOVERY: &str = "entity_recovery";
pub const STRUCTURE_FIDELITY: &str = "structure_fidelity";
pub const SEMANTIC_DRIFT: &str = "semantic_drift";
pub const PATTERN_CONSISTENCY: &str = "pattern_consistency";
pub const FIELD_MAPPING_ACCURACY: &str = "field_mapping_accuracy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HkProtection {
    Active,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeakageAssessment {
    pub leakage_score: f64,
    pub details: BTreeMap<String, f64>,
    pub hk_protection: HkProtection,
}

impl LeakageAssessment {
    /// Assessment carrying only an aggregate score; used when replaying
    /// externally produced scores through the calibrator.
    pub fn from_score(leakage_score: f64, high_risk_threshold: f64) -> Self {
        let leakage_score = leakage_score.clamp(0.0, 1.0);
        Self {
            leakage_score,
            details: BTreeMap::new(),
            hk_protection: protection_for(leakage_score, high_risk_threshold),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.details.get(name).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWeights {
    pub entity_recovery: f64,
    pub structure_fidelity: f64,
    pub semantic_drift: f64,
    pub pattern_consistency: f64,
    pub field_mapping_accuracy: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            entity_recovery: 0.30,
            structure_fidelity: 0.25,
            semantic_drift: 0.20,
            pattern_consistency: 0.15,
            field_mapping_accuracy: 0.10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub weights: MetricWeights,
    /// Scores above this mark HKP protection as degraded.
    pub high_risk_threshold: f64,
    /// Minimum value similarity counted as a recovered entity.
    pub recovery_similarity: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: MetricWeights::default(),
            high_risk_threshold: 0.6,
            recovery_similarity: 0.8,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        let weights = [
            w.entity_recovery,
            w.structure_fidelity,
            w.semantic_drift,
            w.pattern_consistency,
            w.field_mapping_accuracy,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(
                "metric weights must be finite and non-negative".into(),
            ));
        }
        for (name, value) in [
            ("high_risk_threshold", self.high_risk_threshold),
            ("recovery_similarity", self.recovery_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct LeakageScorer {
    config: ScorerConfig,
}

impl LeakageScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Scores one cycle. `history` must be the grammar as it stood before
    /// `record` was observed.
    pub fn score(
        &self,
        original: &SemanticFields,
        record: &EncryptedRecord,
        mimic: &MimicRecord,
        history: &TagGrammar,
    ) -> LeakageAssessment {
        let mimic_values: Vec<&str> = mimic.mimic_fields.values().map(String::as_str).collect();
        let record_shapes: Vec<TagShape> =
            record.tags().map(|t| TagShape::of(t.as_str())).collect();

        let entity_recovery =
            entity_recovery(original, &mimic_values, self.config.recovery_similarity);
        let structure_fidelity = structure_fidelity(&record_shapes, mimic);
        let semantic_drift = semantic_drift(original, &mimic_values);
        let pattern_consistency = pattern_consistency(record, history);
        let field_mapping_accuracy = field_mapping_accuracy(&record_shapes);

        let w = &self.config.weights;
        let leakage_score = (w.entity_recovery * entity_recovery
            + w.structure_fidelity * structure_fidelity
            + w.semantic_drift * (1.0 - semantic_drift)
            + w.pattern_consistency * pattern_consistency
            + w.field_mapping_accuracy * field_mapping_accuracy)
            .clamp(0.0, 1.0);

        let details = BTreeMap::from([
            (ENTITY_RECOVERY.to_string(), entity_recovery),
            (STRUCTURE_FIDELITY.to_string(), structure_fidelity),
            (SEMANTIC_DRIFT.to_string(), semantic_drift),
            (PATTERN_CONSISTENCY.to_string(), pattern_consistency),
            (FIELD_MAPPING_ACCURACY.to_string(), field_mapping_accuracy),
        ]);
        debug!("leakage score={:.3} details={:?}", leakage_score, details);
        LeakageAssessment {
            leakage_score,
            details,
            hk_protection: protection_for(leakage_score, self.config.high_risk_threshold),
        }
    }
}

fn protection_for(score: f64, high_risk_threshold: f64) -> HkProtection {
    if score > high_risk_threshold {
        HkProtection::Degraded
    } else {
        HkProtection::Active
    }
}

/// Positional character agreement, normalized by the longer string.
pub fn value_similarity(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let longest = len_a.max(len_b);
    if longest == 0 {
        return 1.0;
    }
    let matching = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
    matching as f64 / longest as f64
}

fn best_similarity(truth: &str, guesses: &[&str]) -> f64 {
    guesses
        .iter()
        .map(|guess| value_similarity(truth, guess))
        .fold(0.0, f64::max)
}

fn entity_recovery(original: &SemanticFields, guesses: &[&str], threshold: f64) -> f64 {
    if original.entities.is_empty() || guesses.is_empty() {
        return 0.0;
    }
    let recovered = original
        .entities
        .values()
        .filter(|value| best_similarity(value, guesses) >= threshold)
        .count();
    recovered as f64 / original.entities.len() as f64
}

fn structure_fidelity(record_shapes: &[TagShape], mimic: &MimicRecord) -> f64 {
    let genuine: BTreeSet<TagShape> = record_shapes.iter().copied().collect();
    let forged: BTreeSet<TagShape> = mimic.mimic_fields.keys().map(|t| TagShape::of(t)).collect();
    if genuine.is_empty() || forged.is_empty() {
        return 0.0;
    }
    let shared = genuine.intersection(&forged).count();
    let union = genuine.union(&forged).count();
    shared as f64 / union as f64
}

fn semantic_drift(original: &SemanticFields, guesses: &[&str]) -> f64 {
    if guesses.is_empty() {
        return 1.0;
    }
    let truths: Vec<&str> = std::iter::once(original.intent.as_str())
        .chain(original.entities.values().map(String::as_str))
        .collect();
    let mean = truths
        .iter()
        .map(|truth| best_similarity(truth, guesses))
        .sum::<f64>()
        / truths.len() as f64;
    (1.0 - mean).clamp(0.0, 1.0)
}

fn pattern_consistency(record: &EncryptedRecord, history: &TagGrammar) -> f64 {
    let total = record.encrypted_fields.len();
    if total == 0 {
        return 0.0;
    }
    let repeated = record.tags().filter(|t| history.has_seen(t.as_str())).count();
    repeated as f64 / total as f64
}

/// Each shape class of size k lets an attacker map its members with
/// probability 1/k, so the expected hit rate is classes / tags.
fn field_mapping_accuracy(record_shapes: &[TagShape]) -> f64 {
    if record_shapes.is_empty() {
        return 0.0;
    }
    let classes: BTreeSet<&TagShape> = record_shapes.iter().collect();
    classes.len() as f64 / record_shapes.len() as f64
}
