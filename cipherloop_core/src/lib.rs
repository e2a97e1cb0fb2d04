//! Field-level hierarchical-key encryption with an adversarial calibration loop.
//!
//! Records are sealed per field under keys derived from a root key, the
//! requesting role and the current time epoch. Each cycle then probes the
//! sealed record with a mimicry attacker, scores the leakage and raises the
//! security parameters used by later cycles.
//!
//! Experimental; not reviewed for production use.

pub mod aead;
pub mod calibrator;
pub mod cipher;
pub mod config;
pub mod epoch;
pub mod fields;
pub mod kdf;
pub mod mimic;
pub mod orchestrator;
pub mod params;
pub mod preset;
pub mod record;
pub mod rng;
pub mod scorer;
pub mod store;
pub mod versioning;

pub use crate::calibrator::{CalibrationMode, Calibrator, CalibratorConfig, ThetaUpdate};
pub use crate::cipher::{FieldCipher, HkpError};
pub use crate::config::{ConfigError, OrchestratorConfig};
pub use crate::epoch::{DEFAULT_EPOCH_WINDOW_SECS, EpochId, EpochWindow};
pub use crate::fields::{AuthLevel, DecryptedFields, ExecStatus, RoleTag, SemanticFields};
pub use crate::kdf::RootKey;
pub use crate::mimic::{MimicRecord, SpoofStatus, TagGrammar, TagShape, mimic};
pub use crate::orchestrator::{CycleReport, Orchestrator};
pub use crate::params::{SecurityParameters, ThetaSnapshot};
pub use crate::preset::{SecurityLevel, SecurityPreset, security_preset};
pub use crate::record::{EncryptedRecord, FieldBlob, FieldTag, IntegrityProof};
pub use crate::rng::{SecureRng, secure_rng};
pub use crate::scorer::{HkProtection, LeakageAssessment, LeakageScorer, ScorerConfig};
pub use crate::store::{MergeOutcome, ParameterStore};
pub use crate::versioning::*;
