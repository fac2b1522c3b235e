//! cl_crypto — Cipherlink cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited RustCrypto crates.
//! - Zeroize all secret material on drop.
//! - Public APIs return opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `identity` — long-term signing key pair (RSA-2048-PSS / ECDSA P-256),
//!   SPKI public + PKCS#8 private serialization, fingerprints
//! - `exchange` — ephemeral P-256 ECDH pair, one per handshake role
//! - `kdf`      — PBKDF2 wrapping key / HKDF session-key derivation
//! - `aead`     — AES-256-GCM with split iv/tag, plus the wrapped-blob layout
//! - `session`  — the 256-bit session key and its expiry
//! - `codec`    — message and chunked-file encryption emitting the
//!   replay-protection triple (nonce, timestamp, sequence)
//! - `error`    — unified error type

pub mod aead;
pub mod codec;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod kdf;
pub mod session;

pub use error::CryptoError;
