//! Key-exchange brokering.
//!
//! The relay holds a transient [`PendingExchange`] per in-flight handshake.
//! It cannot learn the session key (it sees only ephemeral public halves
//! and signatures) but it re-verifies every flight against the sender's
//! registered identity key so garbage and key-substitution attempts die at
//! ingest, with an audit record.
//!
//! Write discipline per exchange: the response fields are last-writer-wins;
//! `confirmed_by` is set-union; the record is deleted once both parties have
//! confirmed, and expires 5 minutes after creation otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use cl_crypto::identity::{self, SigningAlgorithm};
use cl_proto::api::{
    ConfirmRequest, ConfirmResponse, ExchangeResponseAck, ExchangeResponseInfo,
    ExchangeResponseRequest, ExchangeResponsesResponse, InitiateRequest, InitiateResponse,
    PendingExchangeInfo, PendingExchangesResponse,
};
use cl_proto::canonical::{signing_bytes, HandshakeKind, SignedFields};

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::storage::UserRow;
use crate::AppState;

/// PendingExchange lifetime at the relay.
pub const PENDING_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub public_key: String,
    pub signature: String,
    pub timestamp: i64,
    pub responded_by: String,
}

#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub exchange_id: String,
    pub initiator_id: String,
    pub responder_id: String,
    pub initiator_public_key: String,
    pub initiator_signature: String,
    pub initiator_timestamp: i64,
    pub response: Option<StoredResponse>,
    pub confirmed_by: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingExchange {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(PENDING_TTL_MINUTES)
    }
}

/// In-memory table of in-flight exchanges. Expiry is lazy on access plus
/// the periodic sweep.
#[derive(Clone, Default)]
pub struct ExchangeTable {
    inner: Arc<Mutex<HashMap<String, PendingExchange>>>,
}

impl ExchangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        initiator_id: &str,
        responder_id: &str,
        public_key: &str,
        signature: &str,
        timestamp: i64,
    ) -> String {
        let exchange_id = Uuid::new_v4().to_string();
        let exchange = PendingExchange {
            exchange_id: exchange_id.clone(),
            initiator_id: initiator_id.to_string(),
            responder_id: responder_id.to_string(),
            initiator_public_key: public_key.to_string(),
            initiator_signature: signature.to_string(),
            initiator_timestamp: timestamp,
            response: None,
            confirmed_by: HashSet::new(),
            created_at: Utc::now(),
        };
        self.inner.lock().insert(exchange_id.clone(), exchange);
        exchange_id
    }

    pub fn get(&self, exchange_id: &str) -> Option<PendingExchange> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        match inner.get(exchange_id) {
            Some(e) if e.is_expired(now) => {
                inner.remove(exchange_id);
                None
            }
            Some(e) => Some(e.clone()),
            None => None,
        }
    }

    /// Exchanges where `responder` is the responder, `initiator` the other
    /// party, and no response has been stored yet.
    pub fn pending_for(&self, responder: &str, initiator: &str) -> Vec<PendingExchange> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.retain(|_, e| !e.is_expired(now));
        let mut out: Vec<PendingExchange> = inner
            .values()
            .filter(|e| {
                e.responder_id == responder && e.initiator_id == initiator && e.response.is_none()
            })
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_at);
        out
    }

    /// Exchanges `initiator` created towards `responder` that carry a
    /// stored response.
    pub fn responses_for(&self, initiator: &str, responder: &str) -> Vec<PendingExchange> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.retain(|_, e| !e.is_expired(now));
        let mut out: Vec<PendingExchange> = inner
            .values()
            .filter(|e| {
                e.initiator_id == initiator && e.responder_id == responder && e.response.is_some()
            })
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_at);
        out
    }

    /// Store a response; concurrent RESPOND races resolve last-writer-wins.
    pub fn set_response(&self, exchange_id: &str, response: StoredResponse) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(exchange_id) {
            Some(e) => {
                e.response = Some(response);
                true
            }
            None => false,
        }
    }

    /// Union the confirmer into `confirmed_by`; delete the exchange once
    /// both parties have confirmed. Returns whether both have.
    pub fn confirm(&self, exchange_id: &str, user_id: &str) -> Option<bool> {
        let mut inner = self.inner.lock();
        let exchange = inner.get_mut(exchange_id)?;
        exchange.confirmed_by.insert(user_id.to_string());
        let both = exchange.confirmed_by.contains(&exchange.initiator_id)
            && exchange.confirmed_by.contains(&exchange.responder_id);
        if both {
            inner.remove(exchange_id);
        }
        Some(both)
    }

    pub fn sweep(&self) {
        let now = Utc::now();
        self.inner.lock().retain(|_, e| !e.is_expired(now));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Verify a handshake flight against the sender's registered identity key.
fn verify_flight(
    state: &AppState,
    sender: &UserRow,
    kind: HandshakeKind,
    to_user_id: &str,
    public_key: &str,
    timestamp: i64,
    signature: &str,
) -> Result<(), ApiError> {
    let algorithm = SigningAlgorithm::parse(&sender.algorithm)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let bytes = signing_bytes(&SignedFields {
        kind,
        from_user_id: &sender.id,
        to_user_id,
        public_key,
        timestamp,
    });
    identity::verify_b64(algorithm, &sender.public_key, &bytes, signature).map_err(|_| {
        state.audit.record(
            "invalid_signature",
            json!({
                "userId": sender.id,
                "flight": kind.as_str(),
                "peer": to_user_id,
            }),
        );
        ApiError::rejected("invalid-signature", "flight signature rejected")
    })
}

async fn require_user(state: &AppState, user_id: &str) -> Result<UserRow, ApiError> {
    state
        .storage
        .user_by_id(user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)
}

/// `POST /key-exchange/initiate`
pub async fn initiate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let sender = require_user(&state, &user_id).await?;
    // The recipient must be a registered account.
    require_user(&state, &req.recipient_id).await?;

    verify_flight(
        &state,
        &sender,
        HandshakeKind::Initiate,
        &req.recipient_id,
        &req.public_key,
        req.timestamp,
        &req.signature,
    )?;

    let exchange_id = state.exchanges.create(
        &user_id,
        &req.recipient_id,
        &req.public_key,
        &req.signature,
        req.timestamp,
    );
    state.audit.record(
        "key_exchange_initiated",
        json!({
            "exchangeId": exchange_id,
            "initiator": user_id,
            "responder": req.recipient_id,
        }),
    );
    Ok(Json(InitiateResponse { exchange_id }))
}

/// `POST /key-exchange/response`
///
/// Only the designated responder may answer; in particular the initiator
/// posting a response to their own exchange is rejected.
pub async fn respond(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExchangeResponseRequest>,
) -> Result<Json<ExchangeResponseAck>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let exchange = state
        .exchanges
        .get(&req.exchange_id)
        .ok_or(ApiError::NotFound)?;

    if user_id != exchange.responder_id {
        state.audit.record(
            "key_exchange_unauthorized",
            json!({
                "exchangeId": req.exchange_id,
                "userId": user_id,
                "action": "response",
            }),
        );
        return Err(ApiError::Unauthorized);
    }

    let responder = require_user(&state, &user_id).await?;
    verify_flight(
        &state,
        &responder,
        HandshakeKind::Respond,
        &exchange.initiator_id,
        &req.public_key,
        req.timestamp,
        &req.signature,
    )?;

    let stored = StoredResponse {
        public_key: req.public_key.clone(),
        signature: req.signature.clone(),
        timestamp: req.timestamp,
        responded_by: user_id.clone(),
    };
    if !state.exchanges.set_response(&req.exchange_id, stored) {
        return Err(ApiError::NotFound);
    }
    state.audit.record(
        "key_exchange_response",
        json!({
            "exchangeId": req.exchange_id,
            "responder": user_id,
            "initiator": exchange.initiator_id,
        }),
    );

    // Echo the INITIATE fields back so the initiator can re-verify the
    // original signature.
    Ok(Json(ExchangeResponseAck {
        exchange_id: req.exchange_id,
        original_public_key: exchange.initiator_public_key,
        original_signature: exchange.initiator_signature,
        original_timestamp: exchange.initiator_timestamp,
        response_public_key: req.public_key,
        response_signature: req.signature,
        response_timestamp: req.timestamp,
    }))
}

/// `POST /key-exchange/confirm`
pub async fn confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let exchange = state
        .exchanges
        .get(&req.exchange_id)
        .ok_or(ApiError::NotFound)?;

    if user_id != exchange.initiator_id && user_id != exchange.responder_id {
        state.audit.record(
            "key_exchange_unauthorized",
            json!({
                "exchangeId": req.exchange_id,
                "userId": user_id,
                "action": "confirm",
            }),
        );
        return Err(ApiError::Unauthorized);
    }
    if req.confirmation_hash.is_empty() {
        return Err(ApiError::rejected("missing-confirmation", "empty confirmation hash"));
    }

    let both_confirmed = state
        .exchanges
        .confirm(&req.exchange_id, &user_id)
        .ok_or(ApiError::NotFound)?;
    state.audit.record(
        "key_exchange_confirmed",
        json!({
            "exchangeId": req.exchange_id,
            "userId": user_id,
            "bothConfirmed": both_confirmed,
        }),
    );
    Ok(Json(ConfirmResponse {
        status: "confirmed".to_string(),
        both_confirmed,
    }))
}

/// `GET /key-exchange/pending/{peerId}` — exchanges awaiting the caller's
/// response, initiated by `peerId`.
pub async fn pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<PendingExchangesResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let exchanges = state
        .exchanges
        .pending_for(&user_id, &peer_id)
        .into_iter()
        .map(|e| PendingExchangeInfo {
            exchange_id: e.exchange_id,
            initiator_id: e.initiator_id,
            responder_id: e.responder_id,
            public_key: e.initiator_public_key,
            signature: e.initiator_signature,
            timestamp: e.initiator_timestamp,
        })
        .collect();
    Ok(Json(PendingExchangesResponse { exchanges }))
}

/// `GET /key-exchange/responses/{peerId}` — responses to exchanges the
/// caller initiated towards `peerId`.
pub async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<String>,
) -> Result<Json<ExchangeResponsesResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let responses = state
        .exchanges
        .responses_for(&user_id, &peer_id)
        .into_iter()
        .filter_map(|e| {
            e.response.map(|r| ExchangeResponseInfo {
                exchange_id: e.exchange_id,
                responder_id: r.responded_by,
                original_public_key: e.initiator_public_key,
                original_signature: e.initiator_signature,
                original_timestamp: e.initiator_timestamp,
                response_public_key: r.public_key,
                response_signature: r.signature,
                response_timestamp: r.timestamp,
            })
        })
        .collect();
    Ok(Json(ExchangeResponsesResponse { responses }))
}
