//! Ciphertext entities the relay stores and routes.
//!
//! The relay sees: ciphertext, the AEAD iv/tag, and the replay-protection
//! triple (nonce, timestamp, sequence). For files it additionally sees the
//! name/size/mime metadata envelope (metadata, not content).

use serde::{Deserialize, Serialize};

/// One encrypted text message.
///
/// The `nonce` is a 16-byte random token (base64) consumed by the relay's
/// replay gate; it is NOT the AEAD iv, which is 12 bytes and lives inside the
/// AEAD invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherRecord {
    /// Base64 AES-256-GCM ciphertext (tag excluded).
    pub ciphertext: String,
    /// Base64 12-byte AEAD iv.
    pub iv: String,
    /// Base64 16-byte AEAD authentication tag.
    pub tag: String,
    /// Sender wall clock, milliseconds since the UNIX epoch.
    pub timestamp: i64,
    /// Per-conversation strictly increasing counter, starting at 1.
    pub sequence_number: u64,
    /// Base64 of 16 random bytes; globally unique per accepted message.
    pub nonce: String,
}

/// One independently sealed 1 MiB slice of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherChunk {
    /// Dense, 0-based position within the file.
    pub chunk_index: u32,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// Metadata envelope for an encrypted file transfer. Name, size and mime
/// type are plaintext to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEnvelope {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
    pub chunks: Vec<CipherChunk>,
}
