//! Adversarial mimicry: forge plausible records from observed tag shapes.
//!
//! The generator only ever sees decrypted fields and the shapes of tags it
//! has observed on the wire. It has no access to any key or to theta.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::Rng;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::fields::DecryptedFields;
use crate::record::{EncryptedRecord, FieldTag};
use crate::rng::secure_rng;

/// Exact tags remembered for the pattern-consistency metric before the
/// oldest are forgotten.
pub const DEFAULT_SEEN_TAG_CAPACITY: usize = 4096;

/// Longer tag bodies are not learned from.
const MAX_OBSERVED_BODY_CHARS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoofStatus {
    MimicAttempt,
    MimicFailed,
}

/// Forged tag → value mapping produced without key material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimicRecord {
    pub mimic_fields: BTreeMap<String, String>,
    pub spoof_status: SpoofStatus,
}

impl MimicRecord {
    pub fn failed() -> Self {
        Self {
            mimic_fields: BTreeMap::new(),
            spoof_status: SpoofStatus::MimicFailed,
        }
    }
}

/// Coarse character class of a tag body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    Empty,
    Hex,
    Alphanumeric,
    Other,
}

impl Charset {
    pub fn classify(body: &str) -> Self {
        if body.is_empty() {
            Charset::Empty
        } else if body.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            Charset::Hex
        } else if body.chars().all(|c| c.is_ascii_alphanumeric()) {
            Charset::Alphanumeric
        } else {
            Charset::Other
        }
    }
}

/// Observable shape of a tag: prefix, body length and character class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagShape {
    pub prefix: Option<char>,
    pub body_len: usize,
    pub charset: Charset,
}

impl TagShape {
    pub fn of(tag: &str) -> Self {
        let mut chars = tag.chars();
        let prefix = chars.next();
        let body = chars.as_str();
        Self {
            prefix,
            body_len: body.chars().count(),
            charset: Charset::classify(body),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PrefixStats {
    count: u64,
    lengths: BTreeSet<usize>,
}

/// Accumulated tag-shape observations across prior records.
///
/// Memory stays bounded: prefixes and the alphabet only admit printable
/// ASCII, tag bodies over 64 characters are skipped, and
/// exact tags are kept first-in first-out up to `seen_capacity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGrammar {
    prefixes: BTreeMap<char, PrefixStats>,
    alphabet: BTreeSet<char>,
    seen_tags: BTreeSet<String>,
    seen_order: VecDeque<String>,
    seen_capacity: usize,
    records: u64,
}

impl Default for TagGrammar {
    fn default() -> Self {
        Self::with_seen_capacity(DEFAULT_SEEN_TAG_CAPACITY)
    }
}

impl TagGrammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seen_capacity(seen_capacity: usize) -> Self {
        Self {
            prefixes: BTreeMap::new(),
            alphabet: BTreeSet::new(),
            seen_tags: BTreeSet::new(),
            seen_order: VecDeque::new(),
            seen_capacity,
            records: 0,
        }
    }

    pub fn observe(&mut self, record: &EncryptedRecord) {
        for tag in record.tags() {
            self.observe_tag(tag);
        }
        self.records += 1;
    }

    fn observe_tag(&mut self, tag: &FieldTag) {
        let Some(prefix) = tag.prefix().filter(char::is_ascii_graphic) else {
            return;
        };
        let body = tag.body();
        let body_len = body.chars().count();
        if body_len > MAX_OBSERVED_BODY_CHARS {
            return;
        }
        let stats = self.prefixes.entry(prefix).or_default();
        stats.count += 1;
        stats.lengths.insert(body_len);
        self.alphabet.extend(body.chars().filter(char::is_ascii_graphic));
        self.remember(&tag.0);
    }

    fn remember(&mut self, tag: &str) {
        if !self.seen_tags.insert(tag.to_owned()) {
            return;
        }
        self.seen_order.push_back(tag.to_owned());
        while self.seen_order.len() > self.seen_capacity {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen_tags.remove(&oldest);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn records_observed(&self) -> u64 {
        self.records
    }

    pub fn seen_tag_count(&self) -> usize {
        self.seen_tags.len()
    }

    /// Whether this exact tag was already seen on a recent prior record.
    pub fn has_seen(&self, tag: &str) -> bool {
        self.seen_tags.contains(tag)
    }

    /// Draws one tag following the observed prefix frequencies, lengths
    /// and alphabet. `None` when nothing has been observed.
    pub fn sample_tag<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let total: u64 = self.prefixes.values().map(|s| s.count).sum();
        if total == 0 || self.alphabet.is_empty() {
            return None;
        }
        let mut pick = rng.gen_range(0..total);
        let (prefix, stats) = self.prefixes.iter().find(|(_, stats)| {
            if pick < stats.count {
                true
            } else {
                pick -= stats.count;
                false
            }
        })?;
        let lengths: Vec<usize> = stats.lengths.iter().copied().collect();
        let len = lengths[rng.gen_range(0..lengths.len())];
        let alphabet: Vec<char> = self.alphabet.iter().copied().collect();
        let mut tag = String::with_capacity(len + 1);
        tag.push(*prefix);
        for _ in 0..len {
            tag.push(alphabet[rng.gen_range(0..alphabet.len())]);
        }
        Some(tag)
    }
}

pub fn mimic(decrypted: &DecryptedFields, grammar: &TagGrammar) -> MimicRecord {
    mimic_with_rng(decrypted, grammar, &mut secure_rng())
}

/// Forges one tag per decrypted field and pairs it with a format-preserving
/// fake value. Never fails; an empty grammar yields `MimicFailed`.
pub fn mimic_with_rng<R: CryptoRng + RngCore>(
    decrypted: &DecryptedFields,
    grammar: &TagGrammar,
    rng: &mut R,
) -> MimicRecord {
    if grammar.is_empty() {
        return MimicRecord::failed();
    }
    let mut mimic_fields = BTreeMap::new();
    for value in decrypted.values() {
        // A handful of redraws keeps collisions from silently shrinking the forgery.
        for _ in 0..4 {
            let Some(tag) = grammar.sample_tag(rng) else {
                return MimicRecord::failed();
            };
            if !mimic_fields.contains_key(&tag) {
                mimic_fields.insert(tag, forge_value(value, rng));
                break;
            }
        }
    }
    if mimic_fields.is_empty() {
        return MimicRecord::failed();
    }
    MimicRecord {
        mimic_fields,
        spoof_status: SpoofStatus::MimicAttempt,
    }
}

/// Replaces digits and letters with random ones of the same class; keeps
/// separators and whitespace so the forgery has the original's layout.
pub fn forge_value<R: RngCore + ?Sized>(template: &str, rng: &mut R) -> String {
    template
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                char::from(b'0' + rng.gen_range(0..10u8))
            } else if c.is_ascii_lowercase() {
                char::from(b'a' + rng.gen_range(0..26u8))
            } else if c.is_ascii_uppercase() {
                char::from(b'A' + rng.gen_range(0..26u8))
            } else if c.is_alphanumeric() {
                'x'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::FieldCipher;
    use crate::epoch::EpochWindow;
    use crate::fields::{AuthLevel, ExecStatus, RoleTag, SemanticFields};
    use crate::kdf::RootKey;
    use crate::params::{SecurityParameters, ThetaSnapshot};
    use crate::rng::labelled_rng;
    use chrono::{TimeZone, Utc};
    use rand_chacha::ChaCha20Rng;

    fn decrypted() -> DecryptedFields {
        DecryptedFields {
            intent: "transfer".into(),
            entities: [
                ("amount".to_string(), "75000 USD".to_string()),
                ("to_account".to_string(), "7395-8845-2291".to_string()),
            ]
            .into_iter()
            .collect(),
            auth_grade: AuthLevel::L5,
            time_issued: Utc.with_ymd_and_hms(2025, 7, 29, 10, 30, 0).unwrap(),
            exec_status: ExecStatus::Queued,
        }
    }

    fn observed_grammar() -> TagGrammar {
        let root = RootKey::from_bytes([5u8; 32]);
        let snapshot = ThetaSnapshot::new(0, SecurityParameters::default());
        let cipher = FieldCipher::new(&root, snapshot, EpochWindow::default());
        let fields = SemanticFields::new("transfer", AuthLevel::L5, Utc::now())
            .with_entity("amount", "75000 USD")
            .with_entity("to_account", "7395-8845-2291");
        let record = cipher.encrypt(&fields, RoleTag::Gamma5).unwrap();
        let mut grammar = TagGrammar::new();
        grammar.observe(&record);
        grammar
    }

    #[test]
    fn empty_grammar_fails() {
        let out = mimic(&decrypted(), &TagGrammar::new());
        assert_eq!(out.spoof_status, SpoofStatus::MimicFailed);
        assert!(out.mimic_fields.is_empty());
    }

    #[test]
    fn sampled_tags_follow_observed_shapes() {
        let grammar = observed_grammar();
        let mut rng: ChaCha20Rng = labelled_rng(b"mimic-shapes");
        let out = mimic_with_rng(&decrypted(), &grammar, &mut rng);
        assert_eq!(out.spoof_status, SpoofStatus::MimicAttempt);
        assert!(!out.mimic_fields.is_empty());
        for tag in out.mimic_fields.keys() {
            let shape = TagShape::of(tag);
            assert!(matches!(shape.prefix, Some('i') | Some('e')));
            assert_eq!(shape.body_len, 12);
            assert_eq!(shape.charset, Charset::Hex);
        }
    }

    #[test]
    fn forged_values_keep_layout_not_content() {
        let mut rng: ChaCha20Rng = labelled_rng(b"forge");
        let forged = forge_value("7395-8845-2291", &mut rng);
        assert_eq!(forged.len(), 14);
        assert_eq!(forged.chars().nth(4), Some('-'));
        assert_eq!(forged.chars().nth(9), Some('-'));
        assert!(forged.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
        let words = forge_value("75000 USD", &mut rng);
        assert_eq!(words.chars().nth(5), Some(' '));
        assert!(words[6..].chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn grammar_tracks_exact_tags() {
        let grammar = observed_grammar();
        assert_eq!(grammar.records_observed(), 1);
        assert!(!grammar.has_seen("i000000000000"));
        assert!(!grammar.is_empty());
    }

    fn record_with_tags(tags: &[&str]) -> EncryptedRecord {
        let root = RootKey::from_bytes([6u8; 32]);
        let snapshot = ThetaSnapshot::new(0, SecurityParameters::default());
        let cipher = FieldCipher::new(&root, snapshot, EpochWindow::default());
        let fields = SemanticFields::new("ping", AuthLevel::L1, Utc::now());
        let mut record = cipher.encrypt(&fields, RoleTag::Gamma1).unwrap();
        let blob = record.encrypted_fields.values().next().cloned().unwrap();
        record.encrypted_fields.clear();
        for tag in tags {
            record.encrypted_fields.insert(FieldTag((*tag).into()), blob.clone());
        }
        record
    }

    #[test]
    fn seen_tags_evict_oldest_beyond_capacity() {
        let mut grammar = TagGrammar::with_seen_capacity(3);
        for batch in [["e0001", "e0002"], ["e0003", "e0001"], ["e0004", "e0005"]] {
            grammar.observe(&record_with_tags(&batch));
        }
        assert_eq!(grammar.seen_tag_count(), 3);
        assert!(!grammar.has_seen("e0001"));
        assert!(!grammar.has_seen("e0002"));
        assert!(grammar.has_seen("e0003"));
        assert!(grammar.has_seen("e0005"));
        assert_eq!(grammar.records_observed(), 3);
    }

    #[test]
    fn unbounded_shapes_are_not_learned() {
        let mut grammar = TagGrammar::new();
        let long = format!("e{}", "a".repeat(MAX_OBSERVED_BODY_CHARS + 1));
        grammar.observe(&record_with_tags(&[long.as_str(), "\u{e9}abc", "eab\u{2603}cd"]));
        assert!(!grammar.has_seen(&long));
        assert!(!grammar.has_seen("\u{e9}abc"));
        assert!(grammar.has_seen("eab\u{2603}cd"));
        let mut rng: ChaCha20Rng = labelled_rng(b"ascii-alphabet");
        for _ in 0..32 {
            let tag = grammar.sample_tag(&mut rng).unwrap();
            assert!(tag.chars().all(|c| c.is_ascii_graphic()));
        }
    }

    #[test]
    fn shape_classification() {
        assert_eq!(TagShape::of("e0a1f").charset, Charset::Hex);
        assert_eq!(TagShape::of("eXYZ9").charset, Charset::Alphanumeric);
        assert_eq!(TagShape::of("e-?").charset, Charset::Other);
        assert_eq!(TagShape::of("e").charset, Charset::Empty);
        assert_eq!(TagShape::of("").prefix, None);
    }
}
