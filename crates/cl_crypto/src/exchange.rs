//! Ephemeral Diffie–Hellman exchange pairs.
//!
//! One P-256 pair is generated per handshake role and destroyed on
//! completion or expiry (10 minutes). The relay only ever sees the public
//! half plus an identity signature over it; the private scalar stays on the
//! generating device, password-wrapped while at rest.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Maximum lifetime of an ephemeral pair.
pub const EXCHANGE_TTL_MINUTES: i64 = 10;

/// An ephemeral P-256 key pair for one handshake role.
pub struct ExchangePair {
    secret: p256::SecretKey,
    pub created_at: DateTime<Utc>,
}

impl ExchangePair {
    pub fn generate() -> Self {
        Self {
            secret: p256::SecretKey::random(&mut OsRng),
            created_at: Utc::now(),
        }
    }

    /// Public half as base64 SPKI, the form carried in handshake flights.
    pub fn public_spki_b64(&self) -> Result<String, CryptoError> {
        let der = self
            .secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// Raw ECDH shared secret Z with a peer's ephemeral public half.
    pub fn shared_secret(&self, peer_spki_b64: &str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let der = STANDARD.decode(peer_spki_b64)?;
        let peer = p256::PublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let mut z = Zeroizing::new([0u8; 32]);
        z.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(z)
    }

    /// Private scalar as DER PKCS#8, for password-wrapped persistence.
    pub fn export_private(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let doc = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Restore a persisted pair; `created_at` comes from the storage row so
    /// expiry survives the round-trip.
    pub fn import_private(pkcs8: &[u8], created_at: DateTime<Utc>) -> Result<Self, CryptoError> {
        let secret = p256::SecretKey::from_pkcs8_der(pkcs8)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { secret, created_at })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(EXCHANGE_TTL_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree_on_z() {
        let a = ExchangePair::generate();
        let b = ExchangePair::generate();
        let z_a = a.shared_secret(&b.public_spki_b64().unwrap()).unwrap();
        let z_b = b.shared_secret(&a.public_spki_b64().unwrap()).unwrap();
        assert_eq!(*z_a, *z_b);
    }

    #[test]
    fn private_roundtrip_preserves_agreement() {
        let a = ExchangePair::generate();
        let b = ExchangePair::generate();
        let pkcs8 = a.export_private().unwrap();
        let restored = ExchangePair::import_private(&pkcs8, a.created_at).unwrap();
        assert_eq!(
            *restored.shared_secret(&b.public_spki_b64().unwrap()).unwrap(),
            *a.shared_secret(&b.public_spki_b64().unwrap()).unwrap(),
        );
    }

    #[test]
    fn expiry_is_ten_minutes() {
        let pair = ExchangePair::generate();
        assert!(!pair.is_expired(Utc::now()));
        assert!(pair.is_expired(Utc::now() + Duration::minutes(11)));
    }
}
