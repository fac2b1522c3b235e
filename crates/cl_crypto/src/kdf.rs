//! Key derivation.
//!
//! `wrapping_key_from_password` — PBKDF2-HMAC-SHA256, derives the 256-bit
//!   key that seals private blobs at rest.
//!
//! `derive_session_key` — HKDF-SHA256 over the raw ECDH secret Z. The info
//!   string binds the two user ids in sorted order and deliberately omits
//!   the ephemeral public keys: each peer sees different ephemerals in
//!   INITIATE vs. RESPOND, and folding them in would break the requirement
//!   that initiator and responder derive byte-identical keys. Channel
//!   binding therefore rests entirely on the signed INITIATE/RESPOND
//!   flights, not on the KDF info.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// PBKDF2 iteration count for the wrapping key.
pub const WRAP_ITERATIONS: u32 = 150_000;

/// Salt length accompanying every wrapped blob.
pub const SALT_LEN: usize = 16;

const SESSION_INFO_PREFIX: &str = "Cipherlink-Session-Key-";

/// Derive the 256-bit blob-wrapping key from a password and per-blob salt.
pub fn wrapping_key_from_password(password: &[u8], salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password, salt, WRAP_ITERATIONS, key.as_mut());
    key
}

/// Fresh random salt for a new wrapped blob (stored beside it, not secret).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the 256-bit session key from Z, identically at both peers.
///
/// salt = 32 zero bytes; info = `"Cipherlink-Session-Key-<lo>-<hi>"` where
/// `<lo>`/`<hi>` are the two user ids in sorted order.
pub fn derive_session_key(
    z: &[u8; 32],
    self_id: &str,
    other_id: &str,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let (lo, hi) = if self_id <= other_id {
        (self_id, other_id)
    } else {
        (other_id, self_id)
    };
    let info = format!("{SESSION_INFO_PREFIX}{lo}-{hi}");
    let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), z);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(info.as_bytes(), key.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_key_depends_on_salt_and_password() {
        let salt_a = [1u8; SALT_LEN];
        let salt_b = [2u8; SALT_LEN];
        let k1 = wrapping_key_from_password(b"hunter2", &salt_a);
        let k2 = wrapping_key_from_password(b"hunter2", &salt_a);
        let k3 = wrapping_key_from_password(b"hunter2", &salt_b);
        let k4 = wrapping_key_from_password(b"hunter3", &salt_a);
        assert_eq!(*k1, *k2);
        assert_ne!(*k1, *k3);
        assert_ne!(*k1, *k4);
    }

    #[test]
    fn session_key_is_role_agnostic() {
        let z = [7u8; 32];
        let from_a = derive_session_key(&z, "alice", "bob").unwrap();
        let from_b = derive_session_key(&z, "bob", "alice").unwrap();
        assert_eq!(*from_a, *from_b);
    }

    #[test]
    fn session_key_binds_the_pair() {
        let z = [7u8; 32];
        let ab = derive_session_key(&z, "alice", "bob").unwrap();
        let ac = derive_session_key(&z, "alice", "carol").unwrap();
        assert_ne!(*ab, *ac);
    }
}
