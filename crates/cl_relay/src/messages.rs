//! Message ingest and conversation fetch.
//!
//! Ingest order: authentication → replay gate → durable insert. The insert
//! re-validates nonce uniqueness and sequence monotonicity as the backstop
//! for the narrow window where two handlers race past the in-memory gate;
//! a uniqueness violation surfaces as `duplicate-nonce`.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;

use cl_proto::api::{ConversationResponse, SendMessageRequest, SendMessageResponse};
use cl_proto::conversation_id;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::replay::GateInput;
use crate::storage::{NewMessage, StorageError};
use crate::AppState;

/// `POST /messages/send` — 201 on accept, 400 with a gate code otherwise.
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let sender_id = authenticate(&state, &headers)?;
    state
        .storage
        .user_by_id(&req.recipient_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    let conversation = conversation_id(&sender_id, &req.recipient_id);
    state
        .gate
        .check(
            &state.storage,
            &state.audit,
            &GateInput {
                sender_id: &sender_id,
                recipient_id: &req.recipient_id,
                conversation_id: &conversation,
                timestamp: req.timestamp,
                sequence_number: req.sequence_number,
                nonce: req.nonce.as_deref(),
            },
        )
        .await
        .map_err(|rejection| ApiError::rejected(rejection.code(), "message rejected"))?;

    // The gate owns field validation; reaching here means all three are set.
    let (timestamp, sequence_number, nonce) = (
        req.timestamp.unwrap_or_default(),
        req.sequence_number.unwrap_or_default(),
        req.nonce.unwrap_or_default(),
    );

    let message_id = state
        .storage
        .insert_message(&NewMessage {
            sender_id: &sender_id,
            recipient_id: &req.recipient_id,
            conversation_id: &conversation,
            ciphertext: &req.ciphertext,
            iv: &req.iv,
            tag: &req.tag,
            timestamp,
            sequence_number,
            nonce: &nonce,
        })
        .await
        .map_err(|e| match e {
            StorageError::DuplicateNonce => {
                state.audit.record(
                    "replay_attack_duplicate_nonce",
                    json!({
                        "sender": sender_id,
                        "recipient": req.recipient_id,
                        "nonce": nonce,
                        "source": "storage-backstop",
                    }),
                );
                ApiError::rejected("duplicate-nonce", "nonce already accepted")
            }
            StorageError::StaleSequence => {
                state.audit.record(
                    "replay_attack_invalid_sequence",
                    json!({
                        "sender": sender_id,
                        "recipient": req.recipient_id,
                        "sequence": sequence_number,
                        "source": "storage-backstop",
                    }),
                );
                ApiError::rejected("invalid-sequence-number", "sequence not beyond last accepted")
            }
            other => ApiError::Internal(other.to_string()),
        })?;

    state.audit.record(
        "message_sent",
        json!({
            "messageId": message_id,
            "sender": sender_id,
            "recipient": req.recipient_id,
            "sequence": sequence_number,
        }),
    );
    Ok((StatusCode::CREATED, Json(SendMessageResponse { message_id })))
}

/// `GET /messages/conversation/{peerId}` — ciphertext records, oldest first.
pub async fn conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let conversation = conversation_id(&user_id, &peer_id);
    let messages = state
        .storage
        .conversation(&conversation)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state.audit.record(
        "message_access",
        json!({
            "userId": user_id,
            "peerId": peer_id,
            "count": messages.len(),
        }),
    );
    Ok(Json(ConversationResponse { messages }))
}
