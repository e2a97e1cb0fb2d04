use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::aead::AEAD_NONCE_BYTES;
use crate::epoch::EpochId;
use crate::fields::RoleTag;
use crate::params::SecurityParameters;
use crate::versioning::{ENCRYPTED_RECORD_VERSION, FIELD_BLOB_VERSION, expect_version};

pub const PROOF_BYTES: usize = 32;
pub const INTENT_TAG_PREFIX: char = 'i';
pub const ENTITY_TAG_PREFIX: char = 'e';

/// Obfuscated on-wire name of a field.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTag(pub String);

impl FieldTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> Option<char> {
        self.0.chars().next()
    }

    pub fn body(&self) -> &str {
        self.prefix()
            .map(|prefix| &self.0[prefix.len_utf8()..])
            .unwrap_or("")
    }
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque sealed value: `[version][nonce][ciphertext ‖ AEAD tag]`.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldBlob(pub Vec<u8>);

impl FieldBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn split(&self) -> Option<([u8; AEAD_NONCE_BYTES], &[u8])> {
        let (&version, rest) = self.0.split_first()?;
        if version != FIELD_BLOB_VERSION || rest.len() < AEAD_NONCE_BYTES {
            return None;
        }
        let (nonce_bytes, ciphertext) = rest.split_at(AEAD_NONCE_BYTES);
        let mut nonce = [0u8; AEAD_NONCE_BYTES];
        nonce.copy_from_slice(nonce_bytes);
        Some((nonce, ciphertext))
    }
}

impl fmt::Debug for FieldBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldBlob({} bytes)", self.0.len())
    }
}

impl Serialize for FieldBlob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for FieldBlob {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Proof-of-Protocol: keyed hash binding fields, tags and parameters.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IntegrityProof(pub [u8; PROOF_BYTES]);

impl IntegrityProof {
    /// Constant-time comparison.
    pub fn matches(&self, other: &blake3::Hash) -> bool {
        blake3::Hash::from(self.0) == *other
    }
}

impl fmt::Debug for IntegrityProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntegrityProof({})", hex::encode(self.0))
    }
}

impl Serialize for IntegrityProof {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for IntegrityProof {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let mut bytes = [0u8; PROOF_BYTES];
        hex::decode_to_slice(encoded, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Role- and time-locked ciphertext for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedRecord {
    pub version: u16,
    pub encrypted_fields: BTreeMap<FieldTag, FieldBlob>,
    pub role_tag: RoleTag,
    pub time_tag: EpochId,
    pub params: SecurityParameters,
    pub integrity_proof: IntegrityProof,
}

impl EncryptedRecord {
    /// Bytes covered by the integrity proof. Every variable-length item is
    /// length-prefixed so no two records share an encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.encrypted_fields.len() * 64);
        out.extend_from_slice(b"cipherloop::record");
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.role_tag.level());
        out.extend_from_slice(&self.time_tag.to_le_bytes());
        out.extend_from_slice(&self.params.to_bytes());
        out.extend_from_slice(&(self.encrypted_fields.len() as u32).to_le_bytes());
        for (tag, blob) in &self.encrypted_fields {
            out.extend_from_slice(&(tag.0.len() as u32).to_le_bytes());
            out.extend_from_slice(tag.0.as_bytes());
            out.extend_from_slice(&(blob.0.len() as u32).to_le_bytes());
            out.extend_from_slice(&blob.0);
        }
        out
    }

    pub fn tags(&self) -> impl Iterator<Item = &FieldTag> {
        self.encrypted_fields.keys()
    }
}

impl Serialize for EncryptedRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EncryptedRecord", 6)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("encrypted_fields", &self.encrypted_fields)?;
        state.serialize_field("role_tag", &self.role_tag)?;
        state.serialize_field("time_tag", &self.time_tag)?;
        state.serialize_field("params", &self.params)?;
        state.serialize_field("integrity_proof", &self.integrity_proof)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for EncryptedRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            encrypted_fields: BTreeMap<FieldTag, FieldBlob>,
            role_tag: RoleTag,
            time_tag: EpochId,
            params: SecurityParameters,
            integrity_proof: IntegrityProof,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, ENCRYPTED_RECORD_VERSION, "EncryptedRecord")?;
        Ok(Self {
            version: helper.version,
            encrypted_fields: helper.encrypted_fields,
            role_tag: helper.role_tag,
            time_tag: helper.time_tag,
            params: helper.params,
            integrity_proof: helper.integrity_proof,
        })
    }
}
