//! The encrypt → probe → score → calibrate loop around a shared parameter store.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::calibrator::{CalibrationMode, Calibrator, ThetaUpdate};
use crate::cipher::{FieldCipher, HkpError};
use crate::config::{ConfigError, OrchestratorConfig};
use crate::epoch::EpochWindow;
use crate::fields::{DecryptedFields, ExecStatus, RoleTag, SemanticFields};
use crate::kdf::RootKey;
use crate::mimic::{MimicRecord, TagGrammar, mimic};
use crate::params::{SecurityParameters, ThetaSnapshot};
use crate::record::EncryptedRecord;
use crate::scorer::{LeakageAssessment, LeakageScorer};
use crate::store::{MergeOutcome, ParameterStore};

/// Everything one cycle produced, for callers and monitoring.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub record: EncryptedRecord,
    pub decrypted: DecryptedFields,
    pub mimic: MimicRecord,
    pub assessment: LeakageAssessment,
    pub update: ThetaUpdate,
    /// Parameters the record was sealed and opened under.
    pub snapshot_used: ThetaSnapshot,
    /// `None` when the calibrator chose not to propagate.
    pub outcome: Option<MergeOutcome>,
    /// Store state once this cycle finished.
    pub current: ThetaSnapshot,
}

/// Owns the root key, the versioned parameters and the attacker's grammar.
/// Shareable across threads; cycles may run concurrently.
pub struct Orchestrator {
    root: RootKey,
    window: EpochWindow,
    store: ParameterStore,
    grammar: Mutex<TagGrammar>,
    scorer: LeakageScorer,
    calibrator: Calibrator,
}

impl Orchestrator {
    pub fn new(root: RootKey, config: OrchestratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            root,
            window: config.epoch_window(),
            store: ParameterStore::new(config.initial),
            grammar: Mutex::new(TagGrammar::with_seen_capacity(config.seen_tag_capacity)),
            scorer: LeakageScorer::new(config.scorer),
            calibrator: Calibrator::new(config.calibrator),
        })
    }

    pub fn window(&self) -> EpochWindow {
        self.window
    }

    /// Read-only view of the live parameters.
    pub fn current_parameters(&self) -> ThetaSnapshot {
        self.store.snapshot()
    }

    /// Out-of-loop administrative override; the only way to relax parameters.
    pub fn override_parameters(&self, params: SecurityParameters) -> ThetaSnapshot {
        self.store.override_parameters(params)
    }

    /// Copy of the tag grammar accumulated so far.
    pub fn grammar(&self) -> TagGrammar {
        self.grammar.lock().clone()
    }

    /// Seals `fields` under the current parameters without running the loop.
    pub fn seal(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
    ) -> Result<EncryptedRecord, HkpError> {
        self.seal_at(fields, role, Utc::now())
    }

    pub fn seal_at(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
        now: DateTime<Utc>,
    ) -> Result<EncryptedRecord, HkpError> {
        let cipher = FieldCipher::new(&self.root, self.store.snapshot(), self.window);
        cipher.encrypt_at(fields, role, now)
    }

    /// Opens a record produced by any cycle, logging tamper signals.
    pub fn open(
        &self,
        record: &EncryptedRecord,
        role: RoleTag,
        now: DateTime<Utc>,
    ) -> Result<DecryptedFields, HkpError> {
        let snapshot = ThetaSnapshot::new(self.store.snapshot().version, record.params);
        let cipher = FieldCipher::new(&self.root, snapshot, self.window);
        let mut decrypted = cipher.decrypt_at(record, role, now).map_err(report_tamper)?;
        decrypted.exec_status = ExecStatus::Queued;
        Ok(decrypted)
    }

    pub fn run_cycle(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
    ) -> Result<CycleReport, HkpError> {
        self.run_cycle_at(fields, role, Utc::now())
    }

    /// One full cycle with sealing and opening both taking place at `now`.
    pub fn run_cycle_at(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, HkpError> {
        let snapshot = self.store.snapshot();
        let cipher = FieldCipher::new(&self.root, snapshot, self.window);
        let record = cipher.encrypt_at(fields, role, now)?;
        let mut decrypted = cipher.decrypt_at(&record, role, now).map_err(report_tamper)?;
        decrypted.exec_status = ExecStatus::Queued;

        let (mimic, assessment) = {
            let mut grammar = self.grammar.lock();
            let mimic = mimic(&decrypted, &grammar);
            let assessment = self.scorer.score(fields, &record, &mimic, &grammar);
            grammar.observe(&record);
            (mimic, assessment)
        };

        let update = self.calibrator.calibrate(&assessment, snapshot.params);
        let (outcome, current) = if update.propagate {
            let (outcome, current) = self.store.merge_update(snapshot.version, update.params);
            if outcome != MergeOutcome::Unchanged {
                info!(
                    "{} v{} -> v{} score={:.3} {:?}",
                    mode_label(update.mode),
                    snapshot.version,
                    current.version,
                    assessment.leakage_score,
                    current.params
                );
            }
            (Some(outcome), current)
        } else {
            (None, self.store.snapshot())
        };
        debug!(
            "cycle role={} theta_version={} score={:.3} mode={:?} outcome={:?}",
            role, snapshot.version, assessment.leakage_score, update.mode, outcome
        );

        Ok(CycleReport {
            record,
            decrypted,
            mimic,
            assessment,
            update,
            snapshot_used: snapshot,
            outcome,
            current,
        })
    }
}

fn report_tamper(err: HkpError) -> HkpError {
    if matches!(err, HkpError::Integrity) {
        warn!("integrity proof mismatch, discarding record");
    }
    err
}

fn mode_label(mode: CalibrationMode) -> &'static str {
    match mode {
        CalibrationMode::Maintain => "maintain",
        CalibrationMode::Recalibrate => "recalibrate",
        CalibrationMode::AggressiveRecalibrate => "aggressive recalibrate",
    }
}
