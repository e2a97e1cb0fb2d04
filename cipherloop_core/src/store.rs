//! Versioned, shared home of the live security parameters.

use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::params::{SecurityParameters, ThetaSnapshot};

/// How a proposed update landed in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The base version was current; the proposal replaced the value.
    Applied,
    /// Another writer advanced the version first; the proposal was folded in
    /// by component-wise maximum.
    Merged,
    /// The stored value already dominated the proposal.
    Unchanged,
}

#[derive(Debug)]
pub struct ParameterStore {
    inner: RwLock<ThetaSnapshot>,
}

impl ParameterStore {
    pub fn new(initial: SecurityParameters) -> Self {
        Self {
            inner: RwLock::new(ThetaSnapshot::new(0, initial.clamped())),
        }
    }

    pub fn snapshot(&self) -> ThetaSnapshot {
        *self.inner.read()
    }

    /// Replaces the value only if the stored version is still `expected_version`.
    /// On conflict the current snapshot is returned unchanged.
    pub fn compare_and_swap(
        &self,
        expected_version: u64,
        params: SecurityParameters,
    ) -> Result<ThetaSnapshot, ThetaSnapshot> {
        let mut guard = self.inner.write();
        if guard.version != expected_version {
            return Err(*guard);
        }
        *guard = ThetaSnapshot::new(guard.version + 1, params);
        Ok(*guard)
    }

    /// Folds a calibration proposal made against `base_version` into the
    /// store. The stored value never decreases.
    ///
    /// Each attempt max-merges against a fresh snapshot and commits through
    /// [`compare_and_swap`](Self::compare_and_swap), retrying when another
    /// writer got in between.
    pub fn merge_update(
        &self,
        base_version: u64,
        proposed: SecurityParameters,
    ) -> (MergeOutcome, ThetaSnapshot) {
        let proposed = proposed.clamped();
        let mut current = self.snapshot();
        loop {
            let merged = current.params.max(proposed);
            if merged == current.params {
                return (MergeOutcome::Unchanged, current);
            }
            match self.compare_and_swap(current.version, merged) {
                Ok(next) => {
                    let outcome = if current.version == base_version {
                        MergeOutcome::Applied
                    } else {
                        warn!(
                            "stale calibration against v{} merged into v{}",
                            base_version, current.version
                        );
                        MergeOutcome::Merged
                    };
                    debug!("parameters now v{} {:?}", next.version, next.params);
                    return (outcome, next);
                }
                Err(latest) => {
                    debug!("v{} raced by v{}, retrying merge", current.version, latest.version);
                    current = latest;
                }
            }
        }
    }

    /// Explicit administrative override. Unlike calibration this may relax
    /// parameters; values are clamped and the version always advances.
    pub fn override_parameters(&self, params: SecurityParameters) -> ThetaSnapshot {
        let params = params.clamped();
        let mut guard = self.inner.write();
        *guard = ThetaSnapshot::new(guard.version + 1, params);
        warn!("parameters overridden to v{} {:?}", guard.version, guard.params);
        *guard
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(SecurityParameters::default())
    }
}
