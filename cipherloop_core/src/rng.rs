//! RNG helpers separating deterministic test streams from the system RNG.
//!
//! Nonces and mimicry draws come from the OS-backed `OsRng` in production.
//! Callers that need reproducible output pass their own seeded CSPRNG to the
//! `*_with_rng` variants instead; [`labelled_rng`] builds one from a label.

use blake3::Hasher;
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore, SeedableRng};

/// Convenience alias for the OS-backed RNG used for nonces.
pub type SecureRng = OsRng;

/// Helper that exposes a secure RNG while documenting intent.
pub fn secure_rng() -> SecureRng {
    OsRng
}

/// Deterministic CSPRNG seeded from a BLAKE3 digest of `label`.
pub fn labelled_rng<R: SeedableRng<Seed = [u8; 32]> + CryptoRng + RngCore>(label: &[u8]) -> R {
    let mut hasher = Hasher::new();
    hasher.update(b"cipherloop::rng");
    hasher.update(label);
    R::from_seed(*hasher.finalize().as_bytes())
}
