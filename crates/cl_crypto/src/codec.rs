//! Message and file codec.
//!
//! Produces and consumes [`CipherRecord`]s and [`CipherChunk`]s. Every
//! encryption emits the replay-protection triple: a 16-byte random nonce
//! (base64, for the relay's replay gate; distinct from the AEAD iv), the
//! sender's wall clock in milliseconds, and the caller-supplied
//! per-conversation sequence number.
//!
//! The decoder validates structure and authenticity only. Freshness and
//! sequence monotonicity are the relay gate's job; the decoder merely emits
//! a diagnostic warning for records older than ten minutes.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::RngCore;
use tracing::warn;

use cl_proto::record::{CipherChunk, CipherRecord, FileEnvelope};

use crate::aead;
use crate::error::CryptoError;
use crate::session::SessionKey;

/// Random bytes behind each replay nonce.
pub const NONCE_LEN: usize = 16;

/// File chunk size; the last chunk may be shorter.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Minimum length of a base64 nonce the decoder will accept.
const MIN_NONCE_B64_LEN: usize = 16;

/// Records older than this trigger a diagnostic warning on decode.
const STALE_WARN_MS: i64 = 10 * 60 * 1000;

fn generate_nonce() -> String {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// Encrypt one text message. `sequence` is the conversation's next counter
/// value, supplied by the session map that owns it.
pub fn encrypt_message(
    key: &SessionKey,
    plaintext: &str,
    sequence: u64,
) -> Result<CipherRecord, CryptoError> {
    let (iv, ct, tag) = aead::seal(key.bytes(), plaintext.as_bytes())?;
    Ok(CipherRecord {
        ciphertext: STANDARD.encode(ct),
        iv: STANDARD.encode(iv),
        tag: STANDARD.encode(tag),
        timestamp: Utc::now().timestamp_millis(),
        sequence_number: sequence,
        nonce: generate_nonce(),
    })
}

/// Decrypt one record. Validation order is fixed:
/// 1. replay triple structurally present, else `MissingReplayFields`;
/// 2. nonce is well-formed base64 of sufficient length, else `BadNonce`;
/// 3. AEAD opens, else `AeadDecrypt`; whether the key or the ciphertext was
///    at fault is never disclosed.
pub fn decrypt_message(key: &SessionKey, record: &CipherRecord) -> Result<String, CryptoError> {
    if record.nonce.is_empty() || record.timestamp <= 0 || record.sequence_number == 0 {
        return Err(CryptoError::MissingReplayFields);
    }
    if record.nonce.len() < MIN_NONCE_B64_LEN || STANDARD.decode(&record.nonce).is_err() {
        return Err(CryptoError::BadNonce);
    }

    let age_ms = Utc::now().timestamp_millis() - record.timestamp;
    if age_ms > STALE_WARN_MS {
        // Diagnostics only; the relay gate owns freshness enforcement.
        warn!(age_ms, sequence = record.sequence_number, "decrypting stale record");
    }

    let iv = STANDARD.decode(&record.iv)?;
    let ct = STANDARD.decode(&record.ciphertext)?;
    let tag = STANDARD.decode(&record.tag)?;
    let plaintext = aead::open(key.bytes(), &iv, &ct, &tag)?;
    Ok(String::from_utf8(plaintext.to_vec())?)
}

/// Split a file into 1 MiB chunks and seal each independently. Chunks share
/// neither iv nor tag; indices are dense and 0-based.
pub fn encrypt_file(
    key: &SessionKey,
    file_name: &str,
    mime_type: &str,
    content: &[u8],
) -> Result<FileEnvelope, CryptoError> {
    let mut chunks = Vec::with_capacity(content.len().div_ceil(CHUNK_SIZE).max(1));
    // An empty file still produces one (empty) chunk so the envelope is
    // never chunkless.
    let slices: Vec<&[u8]> = if content.is_empty() {
        vec![&[]]
    } else {
        content.chunks(CHUNK_SIZE).collect()
    };
    for (index, slice) in slices.iter().enumerate() {
        let (iv, ct, tag) = aead::seal(key.bytes(), slice)?;
        chunks.push(CipherChunk {
            chunk_index: index as u32,
            ciphertext: STANDARD.encode(ct),
            iv: STANDARD.encode(iv),
            tag: STANDARD.encode(tag),
        });
    }
    Ok(FileEnvelope {
        file_name: file_name.to_string(),
        file_size: content.len() as u64,
        mime_type: mime_type.to_string(),
        total_chunks: chunks.len() as u32,
        chunks,
    })
}

/// Decrypt a single chunk; chunks may be processed out of order.
pub fn decrypt_chunk(key: &SessionKey, chunk: &CipherChunk) -> Result<Vec<u8>, CryptoError> {
    let iv = STANDARD.decode(&chunk.iv)?;
    let ct = STANDARD.decode(&chunk.ciphertext)?;
    let tag = STANDARD.decode(&chunk.tag)?;
    Ok(aead::open(key.bytes(), &iv, &ct, &tag)?.to_vec())
}

/// Reassemble a full file in ascending chunk-index order.
pub fn decrypt_file(key: &SessionKey, envelope: &FileEnvelope) -> Result<Vec<u8>, CryptoError> {
    let mut ordered: Vec<&CipherChunk> = envelope.chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);
    if ordered.len() != envelope.total_chunks as usize
        || ordered
            .iter()
            .enumerate()
            .any(|(i, c)| c.chunk_index != i as u32)
    {
        return Err(CryptoError::BadChunkIndex);
    }
    let mut content = Vec::with_capacity(envelope.file_size as usize);
    for chunk in ordered {
        content.extend_from_slice(&decrypt_chunk(key, chunk)?);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn key() -> SessionKey {
        SessionKey::new([5u8; 32], "bob", Utc::now())
    }

    #[test]
    fn message_roundtrip() {
        let k = key();
        let record = encrypt_message(&k, "hello", 1).unwrap();
        assert_eq!(record.sequence_number, 1);
        assert_eq!(decrypt_message(&k, &record).unwrap(), "hello");
    }

    #[test]
    fn emitted_nonces_do_not_collide() {
        let k = key();
        let mut seen = HashSet::new();
        for seq in 1..=200 {
            let record = encrypt_message(&k, "x", seq).unwrap();
            assert!(seen.insert(record.nonce), "nonce collision");
        }
    }

    #[test]
    fn missing_replay_fields_rejected_first() {
        let k = key();
        let mut record = encrypt_message(&k, "hello", 1).unwrap();
        record.nonce = String::new();
        assert!(matches!(
            decrypt_message(&k, &record),
            Err(CryptoError::MissingReplayFields)
        ));
    }

    #[test]
    fn malformed_nonce_rejected() {
        let k = key();
        let mut record = encrypt_message(&k, "hello", 1).unwrap();
        record.nonce = "!!!not-base64-at-all!!!".to_string();
        assert!(matches!(decrypt_message(&k, &record), Err(CryptoError::BadNonce)));

        let mut short = encrypt_message(&k, "hello", 2).unwrap();
        short.nonce = "AAAA".to_string();
        assert!(matches!(decrypt_message(&k, &short), Err(CryptoError::BadNonce)));
    }

    #[test]
    fn wrong_key_is_undecipherable_not_distinguished() {
        let k = key();
        let other = SessionKey::new([6u8; 32], "bob", Utc::now());
        let record = encrypt_message(&k, "hello", 1).unwrap();
        assert!(matches!(
            decrypt_message(&other, &record),
            Err(CryptoError::AeadDecrypt)
        ));
    }

    #[test]
    fn tampered_ciphertext_is_undecipherable() {
        let k = key();
        let mut record = encrypt_message(&k, "hello", 1).unwrap();
        let mut raw = STANDARD.decode(&record.ciphertext).unwrap();
        if raw.is_empty() {
            raw.push(0);
        } else {
            raw[0] ^= 0x01;
        }
        record.ciphertext = STANDARD.encode(raw);
        assert!(matches!(
            decrypt_message(&k, &record),
            Err(CryptoError::AeadDecrypt)
        ));
    }

    #[test]
    fn file_roundtrip_multi_chunk() {
        let k = key();
        // 2.5 MiB exercises a short trailing chunk.
        let content: Vec<u8> = (0..(2 * CHUNK_SIZE + CHUNK_SIZE / 2))
            .map(|i| (i % 251) as u8)
            .collect();
        let envelope = encrypt_file(&k, "report.pdf", "application/pdf", &content).unwrap();
        assert_eq!(envelope.total_chunks, 3);
        assert_eq!(envelope.file_size, content.len() as u64);
        assert_eq!(decrypt_file(&k, &envelope).unwrap(), content);
    }

    #[test]
    fn chunks_do_not_share_ivs() {
        let k = key();
        let content = vec![0u8; 2 * CHUNK_SIZE];
        let envelope = encrypt_file(&k, "blob", "application/octet-stream", &content).unwrap();
        assert_ne!(envelope.chunks[0].iv, envelope.chunks[1].iv);
        assert_ne!(envelope.chunks[0].tag, envelope.chunks[1].tag);
    }

    #[test]
    fn chunks_decrypt_out_of_order() {
        let k = key();
        let content = vec![42u8; CHUNK_SIZE + 17];
        let mut envelope = encrypt_file(&k, "blob", "application/octet-stream", &content).unwrap();
        envelope.chunks.reverse();
        assert_eq!(decrypt_file(&k, &envelope).unwrap(), content);
    }

    #[test]
    fn missing_chunk_is_rejected() {
        let k = key();
        let content = vec![42u8; 2 * CHUNK_SIZE];
        let mut envelope = encrypt_file(&k, "blob", "application/octet-stream", &content).unwrap();
        envelope.chunks.remove(0);
        assert!(matches!(
            decrypt_file(&k, &envelope),
            Err(CryptoError::BadChunkIndex)
        ));
    }
}
