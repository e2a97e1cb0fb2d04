use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cipherloop_core::{
    AuthLevel, CalibrationMode, Calibrator, EncryptedRecord, ExecStatus, HkProtection, HkpError,
    LeakageAssessment, MergeOutcome, Orchestrator, OrchestratorConfig, RoleTag, RootKey,
    SecurityLevel, SecurityParameters, SemanticFields, SpoofStatus,
};

fn issued_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 29, 10, 30, 0).unwrap()
}

fn transfer() -> SemanticFields {
    SemanticFields::new("transfer", AuthLevel::L5, issued_at())
        .with_entity("amount", "75000 USD")
        .with_entity("to_account", "7395-8845-2291")
        .with_entity("from_account", "1559-6623-4401")
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(
        RootKey::from_passphrase(b"calibration-loop"),
        OrchestratorConfig::default(),
    )
    .unwrap()
}

#[test]
fn transfer_roundtrips_at_top_role() {
    let orch = orchestrator();
    let fields = transfer();
    let report = orch.run_cycle_at(&fields, RoleTag::Gamma5, issued_at()).unwrap();
    assert_eq!(report.decrypted.intent, "transfer");
    assert_eq!(report.decrypted.entities, fields.entities);
    assert_eq!(report.decrypted.auth_grade, AuthLevel::L5);
    assert_eq!(report.decrypted.exec_status, ExecStatus::Queued);
    assert_eq!(report.snapshot_used.params, SecurityParameters::new(0.5, 0.8, 0.5));
    assert_eq!(report.record.role_tag, RoleTag::Gamma5);
    assert_eq!(report.record.encrypted_fields.len(), 4);
}

#[test]
fn record_never_exposes_field_names_or_values() {
    let orch = orchestrator();
    let record = orch.seal(&transfer(), RoleTag::Gamma5).unwrap();
    let json = serde_json::to_string(&record).unwrap();
    for needle in ["transfer", "amount", "to_account", "75000 USD", "7395-8845-2291"] {
        assert!(!json.contains(needle), "{needle} leaked into {json}");
    }
}

#[test]
fn moderate_leak_escalates_and_low_leak_holds() {
    let calibrator = Calibrator::default();
    let current = SecurityParameters::new(0.5, 0.8, 0.5);

    let update = calibrator.calibrate(&LeakageAssessment::from_score(0.527, 0.6), current);
    assert_eq!(update.mode, CalibrationMode::AggressiveRecalibrate);
    assert!(update.propagate);
    assert!(update.params.entropy > current.entropy);
    assert!(update.params.cipher_strength > current.cipher_strength);
    assert!(update.params.role_decay > current.role_decay);

    let update = calibrator.calibrate(&LeakageAssessment::from_score(0.05, 0.6), current);
    assert_eq!(update.mode, CalibrationMode::Maintain);
    assert!(!update.propagate);
    assert_eq!(update.params, current);
}

#[test]
fn sustained_high_risk_saturates() {
    let calibrator = Calibrator::default();
    let mut current = SecurityParameters::new(0.5, 0.8, 0.5);
    for score in [0.4, 0.45, 0.9, 0.6, 0.41, 1.0] {
        let next = calibrator
            .calibrate(&LeakageAssessment::from_score(score, 0.6), current)
            .params;
        assert!(next.dominates(&current));
        current = next;
    }
    assert_eq!(current, SecurityParameters::new(1.0, 1.0, 1.0));
}

#[test]
fn role_ordering_is_enforced() {
    let orch = orchestrator();
    let now = issued_at();
    let top = orch.seal_at(&transfer(), RoleTag::Gamma5, now).unwrap();
    match orch.open(&top, RoleTag::Gamma3, now) {
        Err(HkpError::RoleDenied {
            required,
            requested,
        }) => {
            assert_eq!(required, RoleTag::Gamma5);
            assert_eq!(requested, RoleTag::Gamma3);
        }
        other => panic!("expected role denial, got {other:?}"),
    }
    let mid = orch.seal_at(&transfer(), RoleTag::Gamma3, now).unwrap();
    let opened = orch.open(&mid, RoleTag::Gamma5, now).unwrap();
    assert_eq!(opened.intent, "transfer");
}

#[test]
fn expired_record_fails_without_touching_state() {
    let orch = orchestrator();
    let before = orch.current_parameters();
    let record = orch.seal_at(&transfer(), RoleTag::Gamma5, issued_at()).unwrap();
    let late = issued_at() + Duration::seconds(2 * orch.window().secs() as i64 + 1);
    let err = orch.open(&record, RoleTag::Gamma5, late).unwrap_err();
    assert!(matches!(err, HkpError::TimeWindowExpired { .. }));
    assert_eq!(orch.current_parameters(), before);
    assert!(orch.grammar().is_empty());
}

#[test]
fn stale_or_early_request_timestamps_still_cycle() {
    let orch = orchestrator();
    let now = Utc::now();
    for timestamp in [now - Duration::minutes(20), now + Duration::minutes(20)] {
        let mut fields = transfer();
        fields.timestamp = timestamp;
        let report = orch.run_cycle(&fields, RoleTag::Gamma5).unwrap();
        assert_eq!(report.decrypted.entities, fields.entities);
        assert!(orch.window().is_valid(report.record.time_tag, Utc::now()));
    }

    let old = SemanticFields::new("transfer", AuthLevel::L5, issued_at() - Duration::days(400))
        .with_entity("amount", "75000 USD");
    let report = orch.run_cycle_at(&old, RoleTag::Gamma5, issued_at()).unwrap();
    assert_eq!(report.record.time_tag, orch.window().epoch_of(issued_at()));
}

#[test]
fn repeated_traffic_hardens_parameters() {
    let orch = orchestrator();
    let initial = orch.current_parameters();
    let first = orch.run_cycle_at(&transfer(), RoleTag::Gamma5, issued_at()).unwrap();
    assert_eq!(first.mimic.spoof_status, SpoofStatus::MimicFailed);
    assert_eq!(first.update.mode, CalibrationMode::Maintain);

    let second = orch.run_cycle_at(&transfer(), RoleTag::Gamma5, issued_at()).unwrap();
    assert_eq!(second.mimic.spoof_status, SpoofStatus::MimicAttempt);
    assert!(second.update.propagate);
    assert_eq!(second.outcome, Some(MergeOutcome::Applied));
    assert!(second.current.version > initial.version);
    assert!(second.current.params.entropy > initial.params.entropy);
    assert!(second.current.params.cipher_strength > initial.params.cipher_strength);
    assert!(second.current.params.role_decay > initial.params.role_decay);

    let third = orch.run_cycle_at(&transfer(), RoleTag::Gamma5, issued_at()).unwrap();
    assert_eq!(third.snapshot_used, second.current);
    assert_eq!(third.record.params, second.current.params);
}

#[test]
fn high_leakage_is_flagged_degraded() {
    let assessment = LeakageAssessment::from_score(0.75, 0.6);
    assert_eq!(assessment.hk_protection, HkProtection::Degraded);
    let update = Calibrator::default().calibrate(&assessment, SecurityParameters::default());
    assert_eq!(update.mode, CalibrationMode::AggressiveRecalibrate);
}

#[test]
fn concurrent_cycles_never_regress() {
    let orch = Arc::new(orchestrator());
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let orch = Arc::clone(&orch);
            thread::spawn(move || {
                let fields = transfer().with_entity("worker", format!("w-{worker}"));
                let mut reports = Vec::new();
                for _ in 0..10 {
                    let report = orch.run_cycle_at(&fields, RoleTag::Gamma4, issued_at()).unwrap();
                    assert!(report.current.params.dominates(&report.snapshot_used.params));
                    assert!(report.current.version >= report.snapshot_used.version);
                    reports.push(report);
                }
                reports
            })
        })
        .collect();

    let mut applied_versions = BTreeSet::new();
    for handle in handles {
        for report in handle.join().unwrap() {
            if matches!(report.outcome, Some(MergeOutcome::Applied | MergeOutcome::Merged)) {
                assert!(
                    applied_versions.insert(report.current.version),
                    "version {} produced twice",
                    report.current.version
                );
            }
        }
    }
    let last = orch.current_parameters();
    assert_eq!(last.version as usize, applied_versions.len());
    assert!(last.params.dominates(&SecurityParameters::default()));
    assert_eq!(orch.grammar().records_observed(), 80);
}

#[test]
fn record_survives_json_transport() {
    let orch = orchestrator();
    let record = orch.seal_at(&transfer(), RoleTag::Gamma2, issued_at()).unwrap();
    let wire = serde_json::to_vec(&record).unwrap();
    let back: EncryptedRecord = serde_json::from_slice(&wire).unwrap();
    let opened = orch.open(&back, RoleTag::Gamma2, issued_at()).unwrap();
    assert_eq!(opened.entities, transfer().entities);
}

#[test]
fn other_root_cannot_open() {
    let record = orchestrator()
        .seal_at(&transfer(), RoleTag::Gamma1, issued_at())
        .unwrap();
    let stranger = Orchestrator::new(
        RootKey::from_passphrase(b"someone else"),
        OrchestratorConfig::default(),
    )
    .unwrap();
    let err = stranger.open(&record, RoleTag::Gamma5, issued_at()).unwrap_err();
    assert!(matches!(err, HkpError::Integrity));
}

#[test]
fn paranoid_preset_starts_stronger() {
    let orch = Orchestrator::new(
        RootKey::from_passphrase(b"paranoid"),
        OrchestratorConfig::from_preset(SecurityLevel::Paranoid),
    )
    .unwrap();
    let params = orch.current_parameters().params;
    assert!(params.dominates(&SecurityParameters::default()));
    let report = orch.run_cycle_at(&transfer(), RoleTag::Gamma5, issued_at()).unwrap();
    assert_eq!(report.decrypted.entities, transfer().entities);
}
