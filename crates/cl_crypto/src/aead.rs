//! Authenticated encryption.
//!
//! AES-256-GCM throughout. Key: 32 bytes. IV: 12 bytes, fresh and uniformly
//! random per operation. Tag: 16 bytes, carried as a separate field in
//! records and appended in the wrapped-blob layout.
//!
//! Wrapped-blob wire format (private keys and session keys at rest):
//!   base64( iv(12) ‖ ciphertext ‖ tag(16) ), plus a separate base64 salt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Fresh uniformly random 12-byte IV.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt with a fresh IV; returns (iv, ciphertext, tag) as separate parts.
pub fn seal(
    key: &[u8; 32],
    plaintext: &[u8],
) -> Result<([u8; IV_LEN], Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let iv = generate_iv();
    let mut combined = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let tag_offset = combined.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&combined[tag_offset..]);
    combined.truncate(tag_offset);
    Ok((iv, combined, tag))
}

/// Decrypt separate (iv, ciphertext, tag) parts.
pub fn open(
    key: &[u8; 32],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), combined.as_slice())
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

/// Seal a private blob under a wrapping key: `base64(iv ‖ ct ‖ tag)`.
pub fn seal_blob(wrapping_key: &[u8; 32], plaintext: &[u8]) -> Result<String, CryptoError> {
    let (iv, ct, tag) = seal(wrapping_key, plaintext)?;
    let mut out = Vec::with_capacity(IV_LEN + ct.len() + TAG_LEN);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ct);
    out.extend_from_slice(&tag);
    Ok(STANDARD.encode(out))
}

/// Open a wrapped blob. A tag mismatch is indistinguishable from tampering;
/// callers surface it as a single wrong-password-or-corrupt condition.
pub fn open_blob(wrapping_key: &[u8; 32], blob_b64: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let data = STANDARD.decode(blob_b64)?;
    if data.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (iv, rest) = data.split_at(IV_LEN);
    let (ct, tag) = rest.split_at(rest.len() - TAG_LEN);
    open(wrapping_key, iv, ct, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [3u8; 32];
        let (iv, ct, tag) = seal(&key, b"attack at dawn").unwrap();
        let pt = open(&key, &iv, &ct, &tag).unwrap();
        assert_eq!(pt.as_slice(), b"attack at dawn");
    }

    #[test]
    fn ivs_are_fresh_per_operation() {
        let key = [3u8; 32];
        let (iv1, _, _) = seal(&key, b"x").unwrap();
        let (iv2, _, _) = seal(&key, b"x").unwrap();
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn tampered_tag_fails() {
        let key = [3u8; 32];
        let (iv, ct, mut tag) = seal(&key, b"payload").unwrap();
        tag[0] ^= 0x01;
        assert!(matches!(open(&key, &iv, &ct, &tag), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn wrong_key_fails() {
        let (iv, ct, tag) = seal(&[3u8; 32], b"payload").unwrap();
        assert!(open(&[4u8; 32], &iv, &ct, &tag).is_err());
    }

    #[test]
    fn blob_roundtrip_and_wrong_key() {
        let key = [9u8; 32];
        let blob = seal_blob(&key, b"pkcs8 bytes").unwrap();
        assert_eq!(open_blob(&key, &blob).unwrap().as_slice(), b"pkcs8 bytes");
        assert!(open_blob(&[8u8; 32], &blob).is_err());
    }
}
