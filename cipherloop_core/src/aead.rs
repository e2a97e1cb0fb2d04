use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, Tag, aead::AeadInPlace};

use crate::cipher::HkpError;
use crate::kdf::KEY_BYTES;

pub const AEAD_NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;

pub fn seal_into(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; AEAD_NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), HkpError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let start = out.len();
    out.extend_from_slice(plaintext);
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut out[start..])
        .map_err(|_| HkpError::Aead)?;
    out.extend_from_slice(tag.as_slice());
    Ok(())
}

pub fn open(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; AEAD_NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, HkpError> {
    if ciphertext.len() < AEAD_TAG_BYTES {
        return Err(HkpError::Aead);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let split = ciphertext.len() - AEAD_TAG_BYTES;
    let (body, tag_bytes) = ciphertext.split_at(split);
    let mut out = body.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut out,
            Tag::from_slice(tag_bytes),
        )
        .map_err(|_| HkpError::Aead)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_appends_after_existing_prefix() {
        let key = [3u8; KEY_BYTES];
        let nonce = [9u8; AEAD_NONCE_BYTES];
        let mut out = vec![0xAA];
        seal_into(&key, &nonce, b"value", b"aad", &mut out).unwrap();
        assert_eq!(out[0], 0xAA);
        assert_eq!(out.len(), 1 + 5 + AEAD_TAG_BYTES);
        let opened = open(&key, &nonce, &out[1..], b"aad").unwrap();
        assert_eq!(opened, b"value");
    }

    #[test]
    fn wrong_aad_fails() {
        let key = [3u8; KEY_BYTES];
        let nonce = [9u8; AEAD_NONCE_BYTES];
        let mut out = Vec::new();
        seal_into(&key, &nonce, b"value", b"aad", &mut out).unwrap();
        assert!(matches!(open(&key, &nonce, &out, b"other"), Err(HkpError::Aead)));
    }

    #[test]
    fn short_input_fails() {
        let key = [3u8; KEY_BYTES];
        let nonce = [9u8; AEAD_NONCE_BYTES];
        assert!(matches!(open(&key, &nonce, &[1, 2, 3], b""), Err(HkpError::Aead)));
    }
}
