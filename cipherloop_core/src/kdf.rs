//! Hierarchical key derivation: root → role → time epoch → field.
//!
//! Every level is a BLAKE3 keyed hash of the level above it, so holding a
//! field key reveals nothing about its siblings or parents. Derivation is a
//! pure function of `(root, role, epoch, field label, theta)`; nothing is
//! stored and decryption re-derives the same keys on demand.
//!
//! The security parameters enter at the field level: their quantized values
//! salt the final hash and their mean sets the number of re-hash rounds.

use std::fmt;

use blake3::Hasher;
use zeroize::Zeroizing;

use crate::epoch::EpochId;
use crate::fields::RoleTag;
use crate::params::SecurityParameters;

pub const KEY_BYTES: usize = 32;
pub const MIN_DERIVATION_ROUNDS: u32 = 1;
pub const MAX_DERIVATION_ROUNDS: u32 = 64;

const ROLE_LABEL: &[u8] = b"cipherloop::role";
const EPOCH_LABEL: &[u8] = b"cipherloop::epoch";
const FIELD_LABEL: &[u8] = b"cipherloop::field";
const ROUND_LABEL: &[u8] = b"cipherloop::round";
const POP_LABEL: &[u8] = b"cipherloop::pop";
const TAG_CONTEXT: &str = "cipherloop 2025 field tag key";
const PASSPHRASE_CONTEXT: &str = "cipherloop 2025 root key from passphrase";

pub type FieldKey = Zeroizing<[u8; KEY_BYTES]>;

/// Process-wide root of the hierarchy. Wiped from memory on drop.
#[derive(Clone)]
pub struct RootKey(Zeroizing<[u8; KEY_BYTES]>);

impl RootKey {
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = Zeroizing::new([0u8; KEY_BYTES]);
        hex::decode_to_slice(encoded.trim(), bytes.as_mut())?;
        Ok(Self(bytes))
    }

    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        Self::from_bytes(blake3::derive_key(PASSPHRASE_CONTEXT, passphrase))
    }

    pub fn generate() -> Self {
        use rand_core::RngCore;
        let mut bytes = Zeroizing::new([0u8; KEY_BYTES]);
        crate::rng::secure_rng().fill_bytes(bytes.as_mut());
        Self(bytes)
    }

    /// Hex export for key files. The returned string is not zeroized.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey(..)")
    }
}

pub fn role_subkey(root: &RootKey, role: RoleTag) -> FieldKey {
    let mut hasher = Hasher::new_keyed(root.as_bytes());
    hasher.update(ROLE_LABEL);
    hasher.update(&[role.level()]);
    finalize(hasher)
}

pub fn time_subkey(role_key: &[u8; KEY_BYTES], epoch: EpochId) -> FieldKey {
    let mut hasher = Hasher::new_keyed(role_key);
    hasher.update(EPOCH_LABEL);
    hasher.update(&epoch.to_le_bytes());
    finalize(hasher)
}

/// Number of re-hash rounds for the field level.
pub fn derivation_rounds(theta: &SecurityParameters) -> u32 {
    let theta = theta.clamped();
    let strength = (theta.entropy + theta.cipher_strength) / 2.0;
    let span = f64::from(MAX_DERIVATION_ROUNDS - MIN_DERIVATION_ROUNDS);
    MIN_DERIVATION_ROUNDS + (strength * span).round() as u32
}

pub fn field_key_from_time(
    time_key: &[u8; KEY_BYTES],
    field_label: &str,
    theta: &SecurityParameters,
) -> FieldKey {
    let salt = theta.to_bytes();
    let mut hasher = Hasher::new_keyed(time_key);
    hasher.update(FIELD_LABEL);
    hasher.update(&(field_label.len() as u32).to_le_bytes());
    hasher.update(field_label.as_bytes());
    hasher.update(&salt);
    let mut key = finalize(hasher);
    for round in 1..derivation_rounds(theta) {
        let mut hasher = Hasher::new_keyed(time_key);
        hasher.update(ROUND_LABEL);
        hasher.update(&round.to_le_bytes());
        hasher.update(key.as_ref());
        key = finalize(hasher);
    }
    key
}

/// Full three-level derivation for one field.
pub fn derive(
    root: &RootKey,
    role: RoleTag,
    epoch: EpochId,
    field_label: &str,
    theta: &SecurityParameters,
) -> FieldKey {
    let role_key = role_subkey(root, role);
    let time_key = time_subkey(&role_key, epoch);
    field_key_from_time(&time_key, field_label, theta)
}

/// Key for the record-level Proof-of-Protocol, scoped to the role.
pub fn pop_key(role_key: &[u8; KEY_BYTES]) -> FieldKey {
    let mut hasher = Hasher::new_keyed(role_key);
    hasher.update(POP_LABEL);
    finalize(hasher)
}

/// Key used to obfuscate field names. Independent of role and time.
pub fn tag_key(root: &RootKey) -> FieldKey {
    Zeroizing::new(blake3::derive_key(TAG_CONTEXT, root.as_bytes()))
}

fn finalize(hasher: Hasher) -> FieldKey {
    Zeroizing::new(*hasher.finalize().as_bytes())
}
