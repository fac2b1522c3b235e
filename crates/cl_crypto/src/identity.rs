//! Long-term identity key management.
//!
//! Each account has one signing key pair, created at registration. The
//! private half never leaves the owning device; the public half (SPKI) is
//! registered at the relay during sign-up and is what peers verify handshake
//! signatures against.
//!
//! Algorithm policy (NON-NEGOTIABLE)
//! ---------------------------------
//! The signing algorithm is a tag fixed at identity creation and persisted
//! with the private blob. Signing and verification both select on the tag;
//! there is NO silent fallback: a blob whose DER imports under the other
//! tag surfaces [`CryptoError::LegacyFormat`] instead.
//!
//! The identity key signs handshake flights only. It is never used for key
//! agreement and never encrypts payloads.

use base64::{engine::general_purpose::STANDARD, Engine};
use p256::pkcs8::{
    DecodePrivateKey as _, DecodePublicKey as _, EncodePrivateKey as _, EncodePublicKey as _,
};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Signing algorithm tag. Serialized into storage rows and the relay's user
/// table; the two ends must always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA-2048 with PSS padding, SHA-256, salt length 32.
    #[serde(rename = "RSA-PSS-2048")]
    RsaPss2048,
    /// ECDSA over NIST P-256 with SHA-256.
    #[serde(rename = "ECDSA-P256")]
    EcdsaP256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::RsaPss2048 => "RSA-PSS-2048",
            SigningAlgorithm::EcdsaP256 => "ECDSA-P256",
        }
    }

    pub fn parse(tag: &str) -> Result<Self, CryptoError> {
        match tag {
            "RSA-PSS-2048" => Ok(SigningAlgorithm::RsaPss2048),
            "ECDSA-P256" => Ok(SigningAlgorithm::EcdsaP256),
            other => Err(CryptoError::InvalidKey(format!(
                "Unknown signing algorithm tag: {other}"
            ))),
        }
    }
}

const RSA_BITS: usize = 2048;
const PSS_SALT_LEN: usize = 32;

/// Long-term identity signing key. The private half self-zeroizes on drop
/// (both backing key types implement ZeroizeOnDrop).
pub enum IdentityKeyPair {
    RsaPss2048 {
        private: rsa::RsaPrivateKey,
        public: rsa::RsaPublicKey,
    },
    EcdsaP256 { private: p256::SecretKey },
}

impl IdentityKeyPair {
    /// Generate a fresh identity under the default algorithm.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with(SigningAlgorithm::RsaPss2048)
    }

    pub fn generate_with(algorithm: SigningAlgorithm) -> Result<Self, CryptoError> {
        match algorithm {
            SigningAlgorithm::RsaPss2048 => {
                let private = rsa::RsaPrivateKey::new(&mut OsRng, RSA_BITS)
                    .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
                let public = private.to_public_key();
                Ok(IdentityKeyPair::RsaPss2048 { private, public })
            }
            SigningAlgorithm::EcdsaP256 => Ok(IdentityKeyPair::EcdsaP256 {
                private: p256::SecretKey::random(&mut OsRng),
            }),
        }
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            IdentityKeyPair::RsaPss2048 { .. } => SigningAlgorithm::RsaPss2048,
            IdentityKeyPair::EcdsaP256 { .. } => SigningAlgorithm::EcdsaP256,
        }
    }

    /// Public half as DER SubjectPublicKeyInfo.
    pub fn export_public(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            IdentityKeyPair::RsaPss2048 { public, .. } => Ok(public
                .to_public_key_der()
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
                .into_vec()),
            IdentityKeyPair::EcdsaP256 { private } => Ok(private
                .public_key()
                .to_public_key_der()
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
                .into_vec()),
        }
    }

    /// Public half as base64 SPKI, the on-wire and at-relay form.
    pub fn export_public_b64(&self) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.export_public()?))
    }

    /// Private half as DER PKCS#8.
    pub fn export_private(&self) -> Result<Vec<u8>, CryptoError> {
        match self {
            IdentityKeyPair::RsaPss2048 { private, .. } => Ok(private
                .to_pkcs8_der()
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
                .as_bytes()
                .to_vec()),
            IdentityKeyPair::EcdsaP256 { private } => Ok(private
                .to_pkcs8_der()
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
                .as_bytes()
                .to_vec()),
        }
    }

    /// Import a PKCS#8 private half under a known algorithm tag.
    ///
    /// Bytes that import under the OTHER tag are a key from before an
    /// algorithm migration: surfaced as `LegacyFormat`, never adopted.
    pub fn import_private(
        algorithm: SigningAlgorithm,
        pkcs8: &[u8],
    ) -> Result<Self, CryptoError> {
        match algorithm {
            SigningAlgorithm::RsaPss2048 => match rsa::RsaPrivateKey::from_pkcs8_der(pkcs8) {
                Ok(private) => {
                    let public = private.to_public_key();
                    Ok(IdentityKeyPair::RsaPss2048 { private, public })
                }
                Err(_) if p256::SecretKey::from_pkcs8_der(pkcs8).is_ok() => {
                    Err(CryptoError::LegacyFormat)
                }
                Err(e) => Err(CryptoError::InvalidKey(e.to_string())),
            },
            SigningAlgorithm::EcdsaP256 => match p256::SecretKey::from_pkcs8_der(pkcs8) {
                Ok(private) => Ok(IdentityKeyPair::EcdsaP256 { private }),
                Err(_) if rsa::RsaPrivateKey::from_pkcs8_der(pkcs8).is_ok() => {
                    Err(CryptoError::LegacyFormat)
                }
                Err(e) => Err(CryptoError::InvalidKey(e.to_string())),
            },
        }
    }

    /// Sign arbitrary bytes. RSA: PSS/SHA-256/salt-32, raw signature bytes.
    /// ECDSA: P-256/SHA-256, DER-encoded signature.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            IdentityKeyPair::RsaPss2048 { private, .. } => {
                let signing_key =
                    rsa::pss::SigningKey::<Sha256>::new_with_salt_len(private.clone(), PSS_SALT_LEN);
                let sig = signing_key.sign_with_rng(&mut OsRng, msg);
                Ok(sig.to_vec())
            }
            IdentityKeyPair::EcdsaP256 { private } => {
                let signing_key = p256::ecdsa::SigningKey::from(private.clone());
                let sig: p256::ecdsa::Signature = signing_key.sign(msg);
                Ok(sig.to_der().as_bytes().to_vec())
            }
        }
    }

    /// Base64 of the raw/DER signature, the on-wire form.
    pub fn sign_b64(&self, msg: &[u8]) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.sign(msg)?))
    }
}

/// Parse an SPKI public half under a fixed algorithm tag and return its
/// canonical DER re-encoding. The round-trip with [`IdentityKeyPair::export_public`]
/// is lossless.
pub fn import_public(algorithm: SigningAlgorithm, spki: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        SigningAlgorithm::RsaPss2048 => {
            let key = rsa::RsaPublicKey::from_public_key_der(spki)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(key
                .to_public_key_der()
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
                .into_vec())
        }
        SigningAlgorithm::EcdsaP256 => {
            let key = p256::PublicKey::from_public_key_der(spki)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(key
                .to_public_key_der()
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
                .into_vec())
        }
    }
}

/// Verify a detached signature against an SPKI public half under a fixed
/// algorithm tag. Any mismatch between the tag and the key material is a
/// verification failure, never a fallback.
pub fn verify(
    algorithm: SigningAlgorithm,
    public_spki: &[u8],
    msg: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    match algorithm {
        SigningAlgorithm::RsaPss2048 => {
            let public = rsa::RsaPublicKey::from_public_key_der(public_spki)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let verifying_key = rsa::pss::VerifyingKey::<Sha256>::new(public);
            let sig = rsa::pss::Signature::try_from(signature)
                .map_err(|_| CryptoError::SignatureVerification)?;
            verifying_key
                .verify(msg, &sig)
                .map_err(|_| CryptoError::SignatureVerification)
        }
        SigningAlgorithm::EcdsaP256 => {
            let public = p256::PublicKey::from_public_key_der(public_spki)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let verifying_key = p256::ecdsa::VerifyingKey::from(public);
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| CryptoError::SignatureVerification)?;
            verifying_key
                .verify(msg, &sig)
                .map_err(|_| CryptoError::SignatureVerification)
        }
    }
}

/// Convenience for wire fields: both inputs base64.
pub fn verify_b64(
    algorithm: SigningAlgorithm,
    public_spki_b64: &str,
    msg: &[u8],
    signature_b64: &str,
) -> Result<(), CryptoError> {
    let spki = STANDARD.decode(public_spki_b64)?;
    let sig = STANDARD.decode(signature_b64)?;
    verify(algorithm, &spki, msg, &sig)
}

/// Human-readable fingerprint of an SPKI public half: SHA-256 truncated to
/// 20 bytes, hex in groups of 4 for out-of-band comparison.
pub fn fingerprint(public_spki: &[u8]) -> String {
    let hash = Sha256::digest(public_spki);
    let hx = hex::encode(&hash[..20]);
    hx.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).expect("hex is ascii"))
        .collect::<Vec<_>>()
        .join(" ")
}
