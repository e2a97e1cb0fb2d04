//! Plaintext-side records exchanged with the extractor and downstream executors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication level assigned by the upstream extractor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthLevel {
    L1,
    L2,
    L3,
    L4,
    L5,
}

impl From<RoleTag> for AuthLevel {
    fn from(role: RoleTag) -> Self {
        match role {
            RoleTag::Gamma1 => AuthLevel::L1,
            RoleTag::Gamma2 => AuthLevel::L2,
            RoleTag::Gamma3 => AuthLevel::L3,
            RoleTag::Gamma4 => AuthLevel::L4,
            RoleTag::Gamma5 => AuthLevel::L5,
        }
    }
}

/// Privilege level a record is locked to. Ordered `Γ1 < … < Γ5`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoleTag {
    #[serde(rename = "Γ1")]
    Gamma1,
    #[serde(rename = "Γ2")]
    Gamma2,
    #[serde(rename = "Γ3")]
    Gamma3,
    #[serde(rename = "Γ4")]
    Gamma4,
    #[serde(rename = "Γ5")]
    Gamma5,
}

impl RoleTag {
    pub const ALL: [RoleTag; 5] = [
        RoleTag::Gamma1,
        RoleTag::Gamma2,
        RoleTag::Gamma3,
        RoleTag::Gamma4,
        RoleTag::Gamma5,
    ];

    pub fn level(self) -> u8 {
        match self {
            RoleTag::Gamma1 => 1,
            RoleTag::Gamma2 => 2,
            RoleTag::Gamma3 => 3,
            RoleTag::Gamma4 => 4,
            RoleTag::Gamma5 => 5,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.get(usize::from(level).checked_sub(1)?).copied()
    }

    /// A role dominates another when it is at least as privileged.
    pub fn dominates(self, required: RoleTag) -> bool {
        self >= required
    }
}

impl From<AuthLevel> for RoleTag {
    fn from(level: AuthLevel) -> Self {
        match level {
            AuthLevel::L1 => RoleTag::Gamma1,
            AuthLevel::L2 => RoleTag::Gamma2,
            AuthLevel::L3 => RoleTag::Gamma3,
            AuthLevel::L4 => RoleTag::Gamma4,
            AuthLevel::L5 => RoleTag::Gamma5,
        }
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Γ{}", self.level())
    }
}

/// Structured request handed over by the extractor. Treated as immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticFields {
    pub intent: String,
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
    pub auth_level: AuthLevel,
    pub timestamp: DateTime<Utc>,
}

impl SemanticFields {
    pub fn new(intent: impl Into<String>, auth_level: AuthLevel, timestamp: DateTime<Utc>) -> Self {
        Self {
            intent: intent.into(),
            entities: BTreeMap::new(),
            auth_level,
            timestamp,
        }
    }

    pub fn with_entity(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(name.into(), value.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// Produced by the cipher; not yet released.
    Pending,
    /// Released by the orchestrator for a downstream executor to advance.
    Queued,
}

/// Fields recovered from a successfully verified record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedFields {
    pub intent: String,
    pub entities: BTreeMap<String, String>,
    pub auth_grade: AuthLevel,
    pub time_issued: DateTime<Utc>,
    pub exec_status: ExecStatus,
}

impl DecryptedFields {
    /// Intent followed by entity values, in canonical order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.intent.as_str()).chain(self.entities.values().map(String::as_str))
    }

    pub fn field_count(&self) -> usize {
        1 + self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_dominance() {
        assert!(RoleTag::Gamma5.dominates(RoleTag::Gamma3));
        assert!(RoleTag::Gamma3.dominates(RoleTag::Gamma3));
        assert!(!RoleTag::Gamma3.dominates(RoleTag::Gamma5));
    }

    #[test]
    fn role_serializes_as_gamma() {
        let json = serde_json::to_string(&RoleTag::Gamma4).unwrap();
        assert_eq!(json, "\"Γ4\"");
        let back: RoleTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RoleTag::Gamma4);
        assert_eq!(RoleTag::Gamma4.to_string(), "Γ4");
    }

    #[test]
    fn level_lookup_bounds() {
        assert_eq!(RoleTag::from_level(0), None);
        assert_eq!(RoleTag::from_level(1), Some(RoleTag::Gamma1));
        assert_eq!(RoleTag::from_level(5), Some(RoleTag::Gamma5));
        assert_eq!(RoleTag::from_level(6), None);
    }

    #[test]
    fn empty_entities_default_on_deserialize() {
        let fields: SemanticFields = serde_json::from_str(
            r#"{"intent":"ping","auth_level":"L2","timestamp":"2025-07-29T10:30:00Z"}"#,
        )
        .unwrap();
        assert!(fields.entities.is_empty());
        assert_eq!(fields.auth_level, AuthLevel::L2);
    }
}
