use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EPOCH_WINDOW_SECS: u64 = 300;

/// Index of a fixed-width time bucket since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(pub u64);

impl EpochId {
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// Buckets timestamps into epochs and answers validity questions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochWindow {
    secs: u64,
}

impl EpochWindow {
    /// Zero-width windows are widened to one second.
    pub fn new(secs: u64) -> Self {
        Self { secs: secs.max(1) }
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn epoch_of(&self, at: DateTime<Utc>) -> EpochId {
        // Instants before 1970 all fall into epoch zero.
        let secs = u64::try_from(at.timestamp()).unwrap_or(0);
        EpochId(secs / self.secs)
    }

    pub fn start_of(&self, epoch: EpochId) -> DateTime<Utc> {
        let secs = epoch.0.saturating_mul(self.secs);
        i64::try_from(secs)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// An epoch stays valid for the window it was issued in and the one
    /// after it. Epochs from the future are never valid.
    pub fn is_valid(&self, issued: EpochId, now: DateTime<Utc>) -> bool {
        let current = self.epoch_of(now);
        issued <= current && current.0 - issued.0 <= 1
    }
}

impl Default for EpochWindow {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_WINDOW_SECS)
    }
}
