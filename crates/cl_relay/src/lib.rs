//! cl_relay — the Cipherlink relay.
//!
//! Stores opaque ciphertext and routing metadata for authenticated users,
//! brokers signed key exchanges, and guards the message ingest path with a
//! three-layer replay gate. Every security-relevant event on the ingest
//! path lands in the NDJSON audit trail.
//!
//! # Module layout
//! - `auth`     — registration, login, bearer tokens
//! - `users`    — identity public-key lookup
//! - `exchange` — pending key-exchange table + handlers
//! - `replay`   — nonce cache, sequence tracker, the gate
//! - `messages` — ingest (gate + durable backstop) and conversation fetch
//! - `files`    — opaque file-envelope routing
//! - `storage`  — SQLite persistence
//! - `audit`    — daily-rotating NDJSON security log
//! - `error`    — ApiError → HTTP mapping

pub mod audit;
pub mod auth;
pub mod error;
pub mod exchange;
pub mod files;
pub mod messages;
pub mod replay;
pub mod storage;
pub mod users;

use std::path::Path;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use audit::AuditLog;
use auth::TokenTable;
use exchange::ExchangeTable;
use replay::ReplayGate;
use storage::Storage;

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub audit: AuditLog,
    pub tokens: TokenTable,
    pub exchanges: ExchangeTable,
    pub gate: ReplayGate,
}

impl AppState {
    /// Open storage and the audit log, with everything else fresh.
    pub async fn open(db_path: &Path, audit_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            storage: Storage::open(db_path).await?,
            audit: AuditLog::new(audit_dir)?,
            tokens: TokenTable::new(),
            exchanges: ExchangeTable::new(),
            gate: ReplayGate::new(),
        })
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users/:id/public-key", get(users::public_key))
        .route("/key-exchange/initiate", post(exchange::initiate))
        .route("/key-exchange/response", post(exchange::respond))
        .route("/key-exchange/confirm", post(exchange::confirm))
        .route("/key-exchange/pending/:peer_id", get(exchange::pending))
        .route("/key-exchange/responses/:peer_id", get(exchange::responses))
        .route("/messages/send", post(messages::send))
        .route("/messages/conversation/:peer_id", get(messages::conversation))
        .route("/files/upload", post(files::upload))
        .route("/files/:id", get(files::fetch))
        .route("/files/conversation/:peer_id", get(files::conversation))
        .with_state(state)
}

/// Background maintenance: evict stale nonce-cache entries and expired
/// pending exchanges every 60 seconds.
pub fn spawn_sweepers(state: &AppState) -> tokio::task::JoinHandle<()> {
    let gate = state.gate.clone();
    let exchanges = state.exchanges.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(replay::SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            gate.sweep();
            exchanges.sweep();
        }
    })
}
