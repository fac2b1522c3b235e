//! The per-conversation session key.
//!
//! One active session per ordered pair of users; both peers hold
//! byte-identical key material. Lifetime is 60 minutes of wall clock; a
//! newer handshake may overwrite an existing key, and the new key applies to
//! all subsequent sends on the conversation.

use chrono::{DateTime, Duration, Utc};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::kdf;

/// Maximum session-key lifetime.
pub const SESSION_TTL_MINUTES: i64 = 60;

/// A 256-bit AEAD session key bound to a peer. Key bytes zeroize on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; 32],
    #[zeroize(skip)]
    pub peer_id: String,
    #[zeroize(skip)]
    pub established_at: DateTime<Utc>,
}

impl SessionKey {
    pub fn new(key: [u8; 32], peer_id: &str, established_at: DateTime<Utc>) -> Self {
        Self {
            key,
            peer_id: peer_id.to_string(),
            established_at,
        }
    }

    /// Derive from the raw ECDH secret, identically at both peers (§kdf).
    pub fn derive(z: &[u8; 32], self_id: &str, other_id: &str) -> Result<Self, CryptoError> {
        let key = kdf::derive_session_key(z, self_id, other_id)?;
        Ok(Self::new(*key, other_id, Utc::now()))
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.established_at > Duration::minutes(SESSION_TTL_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangePair;

    #[test]
    fn initiator_and_responder_derive_identical_keys() {
        let a = ExchangePair::generate();
        let b = ExchangePair::generate();
        let z_a = a.shared_secret(&b.public_spki_b64().unwrap()).unwrap();
        let z_b = b.shared_secret(&a.public_spki_b64().unwrap()).unwrap();
        // A initiated towards bob; B responded towards alice.
        let k_a = SessionKey::derive(&z_a, "alice", "bob").unwrap();
        let k_b = SessionKey::derive(&z_b, "bob", "alice").unwrap();
        assert_eq!(k_a.bytes(), k_b.bytes());
        assert_eq!(k_a.peer_id, "bob");
        assert_eq!(k_b.peer_id, "alice");
    }

    #[test]
    fn expiry_is_sixty_minutes() {
        let key = SessionKey::new([1u8; 32], "bob", Utc::now());
        assert!(!key.is_expired(Utc::now()));
        assert!(key.is_expired(Utc::now() + Duration::minutes(61)));
    }
}
