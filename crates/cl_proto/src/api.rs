//! API request/response types shared between clients and the relay.
//! These map directly to JSON bodies on the wire.

use serde::{Deserialize, Serialize};

use crate::record::{CipherRecord, FileEnvelope};

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// Base64 SubjectPublicKeyInfo of the identity public key.
    pub public_key: String,
    /// Signing algorithm tag fixed at identity creation ("RSA-PSS-2048" or
    /// "ECDSA-P256"). Verification never falls back to the other tag.
    pub algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
    pub username: String,
    pub algorithm: String,
}

// ── Key exchange ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub recipient_id: String,
    /// Base64 SPKI of the initiator's ephemeral P-256 DH public half.
    pub public_key: String,
    /// Base64 detached signature over the canonical INITIATE fields.
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub exchange_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponseRequest {
    pub exchange_id: String,
    pub public_key: String,
    pub signature: String,
    pub timestamp: i64,
}

/// Echoes the INITIATE fields back with the response so the initiator can
/// re-verify the original signature against their own registered key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponseAck {
    pub exchange_id: String,
    pub original_public_key: String,
    pub original_signature: String,
    pub original_timestamp: i64,
    pub response_public_key: String,
    pub response_signature: String,
    pub response_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub exchange_id: String,
    pub confirmation_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub status: String,
    pub both_confirmed: bool,
}

/// An exchange awaiting the caller's RESPOND flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingExchangeInfo {
    pub exchange_id: String,
    pub initiator_id: String,
    pub responder_id: String,
    pub public_key: String,
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingExchangesResponse {
    pub exchanges: Vec<PendingExchangeInfo>,
}

/// An exchange the caller initiated for which the responder has stored a
/// RESPOND flight. The caller's own INITIATE fields are echoed back so the
/// initiator can re-verify that the relay did not substitute them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponseInfo {
    pub exchange_id: String,
    pub responder_id: String,
    pub original_public_key: String,
    pub original_signature: String,
    pub original_timestamp: i64,
    pub response_public_key: String,
    pub response_signature: String,
    pub response_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponsesResponse {
    pub responses: Vec<ExchangeResponseInfo>,
}

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    /// The replay-protection triple. Kept optional so the gate, not the
    /// deserializer, owns the missing-field rejection and its audit record.
    pub timestamp: Option<i64>,
    pub sequence_number: Option<u64>,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
}

/// A stored message as returned by the conversation fetch, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(flatten)]
    pub record: CipherRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub messages: Vec<StoredMessage>,
}

// ── Files ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileRequest {
    pub recipient_id: String,
    pub envelope: FileEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileResponse {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub envelope: FileEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    pub files: Vec<StoredFile>,
}

// ── Common ───────────────────────────────────────────────────────────────────

/// Uniform error body. `error` is a stable machine-readable code; `details`
/// is for operators, never for distinguishing crypto failures in the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
