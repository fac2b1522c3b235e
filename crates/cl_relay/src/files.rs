//! Opaque file-envelope routing.
//!
//! Envelopes are stored as-is: the relay can read the name/size/mime
//! metadata (it is metadata, not content) but every chunk stays sealed.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;

use cl_proto::api::{FileListResponse, StoredFile, UploadFileRequest};
use cl_proto::conversation_id;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::AppState;

/// `POST /files/upload`
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UploadFileRequest>,
) -> Result<(StatusCode, Json<cl_proto::api::UploadFileResponse>), ApiError> {
    let sender_id = authenticate(&state, &headers)?;
    state
        .storage
        .user_by_id(&req.recipient_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    if req.envelope.chunks.len() != req.envelope.total_chunks as usize {
        return Err(ApiError::rejected("invalid-envelope", "chunk count mismatch"));
    }

    let conversation = conversation_id(&sender_id, &req.recipient_id);
    let file_id = state
        .storage
        .insert_file(&sender_id, &req.recipient_id, &conversation, &req.envelope)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.audit.record(
        "file_uploaded",
        json!({
            "fileId": file_id,
            "sender": sender_id,
            "recipient": req.recipient_id,
            "fileName": req.envelope.file_name,
            "fileSize": req.envelope.file_size,
            "totalChunks": req.envelope.total_chunks,
        }),
    );
    Ok((
        StatusCode::CREATED,
        Json(cl_proto::api::UploadFileResponse { file_id }),
    ))
}

/// `GET /files/{id}` — only the two parties may fetch.
pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<Json<StoredFile>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let file = state
        .storage
        .file_by_id(&file_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    if user_id != file.sender_id && user_id != file.recipient_id {
        return Err(ApiError::Unauthorized);
    }
    state.audit.record(
        "file_accessed",
        json!({"fileId": file_id, "userId": user_id}),
    );
    Ok(Json(file))
}

/// `GET /files/conversation/{peerId}`
pub async fn conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<FileListResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let conversation = conversation_id(&user_id, &peer_id);
    let files = state
        .storage
        .conversation_files(&conversation)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state.audit.record(
        "file_accessed",
        json!({"userId": user_id, "peerId": peer_id, "count": files.len()}),
    );
    Ok(Json(FileListResponse { files }))
}
