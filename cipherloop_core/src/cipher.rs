//! Field-level authenticated encryption under the HKP key hierarchy.
//!
//! Each field is sealed with ChaCha20-Poly1305 under its own derived key and
//! stored under an obfuscated tag. The record as a whole is bound to its role
//! tag, time tag and parameters by a Proof-of-Protocol keyed hash, which is
//! checked before any field is opened.

use std::collections::BTreeMap;

use blake3::Hasher;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand_core::{CryptoRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::aead::{AEAD_NONCE_BYTES, open, seal_into};
use crate::epoch::{EpochId, EpochWindow};
use crate::fields::{AuthLevel, DecryptedFields, ExecStatus, RoleTag, SemanticFields};
use crate::kdf::{self, KEY_BYTES, RootKey};
use crate::params::{SecurityParameters, ThetaSnapshot};
use crate::record::{
    ENTITY_TAG_PREFIX, EncryptedRecord, FieldBlob, FieldTag, INTENT_TAG_PREFIX, IntegrityProof,
};
use crate::rng::secure_rng;
use crate::versioning::{ENCRYPTED_RECORD_VERSION, FIELD_BLOB_VERSION};

pub const MIN_TAG_BODY_CHARS: usize = 8;
pub const MAX_TAG_BODY_CHARS: usize = 16;
const MIN_PAD_BLOCK: usize = 8;

#[derive(Debug, Error)]
pub enum HkpError {
    #[error("record integrity proof mismatch")]
    Integrity,

    #[error("time tag {issued} is outside the valid window (current {current})")]
    TimeWindowExpired { issued: EpochId, current: EpochId },

    #[error("role {requested} does not dominate required role {required}")]
    RoleDenied {
        required: RoleTag,
        requested: RoleTag,
    },

    #[error("serialization version mismatch for {context}: expected {expected}, found {found}")]
    VersionMismatch {
        context: &'static str,
        expected: u16,
        found: u16,
    },

    #[error("AEAD operation failed")]
    Aead,

    #[error("field {part} is {len} bytes, limit is {max}")]
    FieldTooLarge {
        part: &'static str,
        len: usize,
        max: usize,
    },
}

enum FieldKind<'n> {
    Intent,
    Entity(&'n str),
}

/// Seals and opens records with one consistent parameter snapshot.
pub struct FieldCipher<'a> {
    root: &'a RootKey,
    tag_key: Zeroizing<[u8; KEY_BYTES]>,
    snapshot: ThetaSnapshot,
    window: EpochWindow,
}

impl<'a> FieldCipher<'a> {
    pub fn new(root: &'a RootKey, snapshot: ThetaSnapshot, window: EpochWindow) -> Self {
        Self {
            root,
            tag_key: kdf::tag_key(root),
            snapshot: ThetaSnapshot::new(snapshot.version, snapshot.params.clamped()),
            window,
        }
    }

    pub fn snapshot(&self) -> ThetaSnapshot {
        self.snapshot
    }

    pub fn window(&self) -> EpochWindow {
        self.window
    }

    /// Obfuscated tag for the intent field under `theta`.
    pub fn intent_tag(&self, theta: &SecurityParameters) -> FieldTag {
        self.field_tag(FieldKind::Intent, theta)
    }

    /// Obfuscated tag for the entity `name` under `theta`.
    pub fn entity_tag(&self, name: &str, theta: &SecurityParameters) -> FieldTag {
        self.field_tag(FieldKind::Entity(name), theta)
    }

    pub fn encrypt(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
    ) -> Result<EncryptedRecord, HkpError> {
        self.encrypt_at(fields, role, Utc::now())
    }

    /// Seals `fields` with the time tag of instant `now`.
    ///
    /// `fields.timestamp` is extractor metadata and plays no part in the
    /// time tag.
    pub fn encrypt_at(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
        now: DateTime<Utc>,
    ) -> Result<EncryptedRecord, HkpError> {
        self.encrypt_with_rng(fields, role, now, &mut secure_rng())
    }

    pub fn encrypt_with_rng<R: CryptoRng + RngCore>(
        &self,
        fields: &SemanticFields,
        role: RoleTag,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<EncryptedRecord, HkpError> {
        let theta = self.snapshot.params;
        let epoch = self.window.epoch_of(now);
        let role_key = kdf::role_subkey(self.root, role);
        let time_key = kdf::time_subkey(&role_key, epoch);

        let mut encrypted_fields = BTreeMap::new();
        let intent_tag = self.intent_tag(&theta);
        let blob = seal_field(
            &time_key,
            &intent_tag,
            role,
            epoch,
            "intent",
            &fields.intent,
            &theta,
            rng,
        )?;
        encrypted_fields.insert(intent_tag, blob);
        for (name, value) in &fields.entities {
            let tag = self.entity_tag(name, &theta);
            let blob = seal_field(&time_key, &tag, role, epoch, name, value, &theta, rng)?;
            encrypted_fields.insert(tag, blob);
        }

        let mut record = EncryptedRecord {
            version: ENCRYPTED_RECORD_VERSION,
            encrypted_fields,
            role_tag: role,
            time_tag: epoch,
            params: theta,
            integrity_proof: IntegrityProof([0u8; 32]),
        };
        record.integrity_proof = IntegrityProof(*compute_proof(&role_key, &record).as_bytes());
        debug!(
            "encrypt role={} epoch={} theta_version={} fields={}",
            role,
            epoch,
            self.snapshot.version,
            record.encrypted_fields.len()
        );
        Ok(record)
    }

    pub fn decrypt(
        &self,
        record: &EncryptedRecord,
        requesting_role: RoleTag,
    ) -> Result<DecryptedFields, HkpError> {
        self.decrypt_at(record, requesting_role, Utc::now())
    }

    /// Verifies and opens `record` as seen at instant `now`.
    pub fn decrypt_at(
        &self,
        record: &EncryptedRecord,
        requesting_role: RoleTag,
        now: DateTime<Utc>,
    ) -> Result<DecryptedFields, HkpError> {
        if record.version != ENCRYPTED_RECORD_VERSION {
            return Err(HkpError::VersionMismatch {
                context: "EncryptedRecord",
                expected: ENCRYPTED_RECORD_VERSION,
                found: record.version,
            });
        }
        let role_key = kdf::role_subkey(self.root, record.role_tag);
        let expected = compute_proof(&role_key, record);
        if !record.integrity_proof.matches(&expected) {
            return Err(HkpError::Integrity);
        }
        if !self.window.is_valid(record.time_tag, now) {
            return Err(HkpError::TimeWindowExpired {
                issued: record.time_tag,
                current: self.window.epoch_of(now),
            });
        }
        if !requesting_role.dominates(record.role_tag) {
            return Err(HkpError::RoleDenied {
                required: record.role_tag,
                requested: requesting_role,
            });
        }

        let theta = record.params;
        let time_key = kdf::time_subkey(&role_key, record.time_tag);
        let intent_tag = self.intent_tag(&theta);
        let mut intent = None;
        let mut entities = BTreeMap::new();
        for (tag, blob) in &record.encrypted_fields {
            let Some((name, value)) =
                open_field(&time_key, tag, record.role_tag, record.time_tag, blob, &theta)
            else {
                continue;
            };
            match tag.prefix() {
                Some(INTENT_TAG_PREFIX) if *tag == intent_tag && name == "intent" => {
                    intent = Some(value);
                }
                Some(ENTITY_TAG_PREFIX) if *tag == self.entity_tag(&name, &theta) => {
                    entities.insert(name, value);
                }
                _ => debug!("dropping unrecognised field tag {}", tag),
            }
        }
        let Some(intent) = intent else {
            warn!("verified record is missing its intent field");
            return Err(HkpError::Integrity);
        };
        debug!(
            "decrypt role={} requested_by={} epoch={} entities={}",
            record.role_tag,
            requesting_role,
            record.time_tag,
            entities.len()
        );
        Ok(DecryptedFields {
            intent,
            entities,
            auth_grade: AuthLevel::from(record.role_tag),
            time_issued: self.window.start_of(record.time_tag),
            exec_status: ExecStatus::Pending,
        })
    }

    fn field_tag(&self, kind: FieldKind<'_>, theta: &SecurityParameters) -> FieldTag {
        let mut hasher = Hasher::new_keyed(&self.tag_key);
        let prefix = match kind {
            FieldKind::Intent => {
                hasher.update(b"intent");
                INTENT_TAG_PREFIX
            }
            FieldKind::Entity(name) => {
                hasher.update(b"entity:");
                hasher.update(name.as_bytes());
                ENTITY_TAG_PREFIX
            }
        };
        let digest = hasher.finalize();
        let mut tag = String::with_capacity(1 + MAX_TAG_BODY_CHARS);
        tag.push(prefix);
        tag.push_str(&digest.to_hex()[..tag_body_len(theta)]);
        FieldTag(tag)
    }
}

/// Hex characters kept from the tag digest; grows with entropy.
pub fn tag_body_len(theta: &SecurityParameters) -> usize {
    let span = (MAX_TAG_BODY_CHARS - MIN_TAG_BODY_CHARS) as f64;
    MIN_TAG_BODY_CHARS + (theta.clamped().entropy * span).round() as usize
}

/// Plaintext is zero-padded to a multiple of this many bytes, 8 to 64.
pub fn pad_block(theta: &SecurityParameters) -> usize {
    MIN_PAD_BLOCK << (theta.clamped().cipher_strength * 3.0).round() as u32
}

fn compute_proof(role_key: &[u8; KEY_BYTES], record: &EncryptedRecord) -> blake3::Hash {
    let pop_key = kdf::pop_key(role_key);
    blake3::keyed_hash(&pop_key, &record.canonical_bytes())
}

fn field_aad(tag: &FieldTag, role: RoleTag, epoch: EpochId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(tag.0.len() + 9);
    aad.extend_from_slice(tag.0.as_bytes());
    aad.push(role.level());
    aad.extend_from_slice(&epoch.to_le_bytes());
    aad
}

#[allow(clippy::too_many_arguments)]
fn seal_field<R: CryptoRng + RngCore>(
    time_key: &[u8; KEY_BYTES],
    tag: &FieldTag,
    role: RoleTag,
    epoch: EpochId,
    name: &str,
    value: &str,
    theta: &SecurityParameters,
    rng: &mut R,
) -> Result<FieldBlob, HkpError> {
    let key = kdf::field_key_from_time(time_key, tag.as_str(), theta);
    let plaintext = Zeroizing::new(encode_plaintext(name, value, pad_block(theta))?);
    let mut nonce = [0u8; AEAD_NONCE_BYTES];
    rng.fill_bytes(&mut nonce);
    let mut out = Vec::with_capacity(1 + AEAD_NONCE_BYTES + plaintext.len() + 16);
    out.push(FIELD_BLOB_VERSION);
    out.extend_from_slice(&nonce);
    seal_into(&key, &nonce, &plaintext, &field_aad(tag, role, epoch), &mut out)?;
    Ok(FieldBlob(out))
}

fn open_field(
    time_key: &[u8; KEY_BYTES],
    tag: &FieldTag,
    role: RoleTag,
    epoch: EpochId,
    blob: &FieldBlob,
    theta: &SecurityParameters,
) -> Option<(String, String)> {
    let (nonce, ciphertext) = blob.split()?;
    let key = kdf::field_key_from_time(time_key, tag.as_str(), theta);
    let aad = field_aad(tag, role, epoch);
    let plaintext = Zeroizing::new(open(&key, &nonce, ciphertext, &aad).ok()?);
    decode_plaintext(&plaintext)
}

fn encode_plaintext(name: &str, value: &str, block: usize) -> Result<Vec<u8>, HkpError> {
    let name_len = u16::try_from(name.len()).map_err(|_| HkpError::FieldTooLarge {
        part: "name",
        len: name.len(),
        max: usize::from(u16::MAX),
    })?;
    let value_len = u32::try_from(value.len()).map_err(|_| HkpError::FieldTooLarge {
        part: "value",
        len: value.len(),
        max: u32::MAX as usize,
    })?;
    let body_len = 2 + name.len() + 4 + value.len();
    let padded_len = body_len.div_ceil(block).max(1) * block;
    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&value_len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    out.resize(padded_len, 0);
    Ok(out)
}

fn decode_plaintext(bytes: &[u8]) -> Option<(String, String)> {
    let (name_len, rest) = bytes.split_first_chunk::<2>()?;
    let name_len = usize::from(u16::from_le_bytes(*name_len));
    let name = rest.get(..name_len)?;
    let rest = &rest[name_len..];
    let (value_len, rest) = rest.split_first_chunk::<4>()?;
    let value_len = u32::from_le_bytes(*value_len) as usize;
    let value = rest.get(..value_len)?;
    if rest[value_len..].iter().any(|&b| b != 0) {
        return None;
    }
    Some((
        String::from_utf8(name.to_vec()).ok()?,
        String::from_utf8(value.to_vec()).ok()?,
    ))
}
