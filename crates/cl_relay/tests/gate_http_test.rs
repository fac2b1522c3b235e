//! Replay-gate scenarios driven through the HTTP surface.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use cl_crypto::identity::{IdentityKeyPair, SigningAlgorithm};
use cl_relay::storage::{NewMessage, StorageError};
use cl_relay::{build_router, AppState};

struct Fixture {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let state = AppState::open(&dir.path().join("relay.db"), &dir.path().join("audit"))
        .await
        .unwrap();
    Fixture {
        app: build_router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Register a user; returns (token, user id).
async fn register(app: &Router, username: &str) -> (String, String) {
    let identity = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();
    let (status, body) = request(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "username": username,
            "password": "correct horse battery staple",
            "publicKey": identity.export_public_b64().unwrap(),
            "algorithm": "ECDSA-P256",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

fn send_body(recipient: &str, nonce: &str, timestamp: i64, sequence: u64) -> Value {
    json!({
        "recipientId": recipient,
        "ciphertext": "b3BhcXVl",
        "iv": "aXYxMjM0NTY3ODkwMTI=",
        "tag": "dGFnMTIzNDU2Nzg5MDEyMzQ1Ng==",
        "timestamp": timestamp,
        "sequenceNumber": sequence,
        "nonce": nonce,
    })
}

#[tokio::test]
async fn accepted_then_replayed_verbatim_is_duplicate_nonce() {
    let f = fixture().await;
    let (token, _alice) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;

    let body = send_body(&bob, "bm9uY2UtMQ==", Utc::now().timestamp_millis(), 1);
    let (status, _) = request(&f.app, Method::POST, "/messages/send", Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    // Attacker resubmits the captured ingest verbatim.
    let (status, err) = request(&f.app, Method::POST, "/messages/send", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "duplicate-nonce");

    // Stored messages unchanged.
    let uri = format!("/messages/conversation/{bob}");
    let (status, conversation) = request(&f.app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["messages"].as_array().unwrap().len(), 1);

    // The attack landed in the audit trail.
    let audit_path = f
        ._dir
        .path()
        .join("audit")
        .join(format!("audit-{}.log", Utc::now().date_naive()));
    let audit = std::fs::read_to_string(audit_path).unwrap();
    assert!(audit.contains("replay_attack_duplicate_nonce"));
    assert!(audit.contains("replay_protection_passed"));
}

#[tokio::test]
async fn stale_timestamp_is_message_too_old() {
    let f = fixture().await;
    let (token, _) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;

    let stale = Utc::now().timestamp_millis() - 6 * 60 * 1000;
    let body = send_body(&bob, "bm9uY2UtMg==", stale, 1);
    let (status, err) = request(&f.app, Method::POST, "/messages/send", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "message-too-old");
}

#[tokio::test]
async fn future_timestamp_is_message_from_future() {
    let f = fixture().await;
    let (token, _) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;

    let future = Utc::now().timestamp_millis() + 2 * 60 * 1000;
    let body = send_body(&bob, "bm9uY2UtMw==", future, 1);
    let (status, err) = request(&f.app, Method::POST, "/messages/send", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "message-from-future");
}

#[tokio::test]
async fn sequence_rewind_is_invalid_sequence_number() {
    let f = fixture().await;
    let (token, _) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;
    let now = Utc::now().timestamp_millis();

    let (status, _) = request(
        &f.app,
        Method::POST,
        "/messages/send",
        Some(&token),
        Some(send_body(&bob, "bm9uY2UtNA==", now, 1)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    for sequence in [1u64, 0] {
        let (status, err) = request(
            &f.app,
            Method::POST,
            "/messages/send",
            Some(&token),
            Some(send_body(&bob, &format!("cmV3aW5kLXt9{sequence}"), now, sequence)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid-sequence-number");
    }
}

#[tokio::test]
async fn missing_replay_fields_rejected() {
    let f = fixture().await;
    let (token, _) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;

    let body = json!({
        "recipientId": bob,
        "ciphertext": "b3BhcXVl",
        "iv": "aXY=",
        "tag": "dGFn",
        // nonce, timestamp, sequenceNumber all absent
    });
    let (status, err) = request(&f.app, Method::POST, "/messages/send", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "missing-replay-fields");
}

#[tokio::test]
async fn unauthenticated_send_is_401() {
    let f = fixture().await;
    let (_, bob) = register(&f.app, "bob").await;
    let body = send_body(&bob, "bm9uY2UtNQ==", Utc::now().timestamp_millis(), 1);
    let (status, _) = request(&f.app, Method::POST, "/messages/send", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_login_is_401_and_audited() {
    let f = fixture().await;
    register(&f.app, "alice").await;
    let (status, _) = request(
        &f.app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_rejects_malformed_public_key() {
    let f = fixture().await;
    let (status, err) = request(
        &f.app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "username": "mallory",
            "password": "pw",
            "publicKey": "bm90IGEga2V5",
            "algorithm": "ECDSA-P256",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid-public-key");
}

#[tokio::test]
async fn initiate_with_forged_signature_is_rejected_and_audited() {
    let f = fixture().await;
    let (token, _alice) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;

    let forger = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();
    let ephemeral = cl_crypto::exchange::ExchangePair::generate();
    let body = json!({
        "recipientId": bob,
        "publicKey": ephemeral.public_spki_b64().unwrap(),
        // Signed by a key that is not Alice's registered identity.
        "signature": forger.sign_b64(b"wrong bytes entirely").unwrap(),
        "timestamp": Utc::now().timestamp_millis(),
    });
    let (status, err) =
        request(&f.app, Method::POST, "/key-exchange/initiate", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid-signature");

    let audit_path = f
        ._dir
        .path()
        .join("audit")
        .join(format!("audit-{}.log", Utc::now().date_naive()));
    let audit = std::fs::read_to_string(audit_path).unwrap();
    assert!(audit.contains("invalid_signature"));
}

/// The durable backstop holds even if the in-memory gate were bypassed.
#[tokio::test]
async fn storage_backstop_enforces_nonce_and_sequence() {
    let f = fixture().await;
    let (_, alice) = register(&f.app, "alice").await;
    let (_, bob) = register(&f.app, "bob").await;

    let base = NewMessage {
        sender_id: &alice,
        recipient_id: &bob,
        conversation_id: "conv",
        ciphertext: "ct",
        iv: "iv",
        tag: "tag",
        timestamp: Utc::now().timestamp_millis(),
        sequence_number: 1,
        nonce: "backstop-nonce",
    };
    f.state.storage.insert_message(&base).await.unwrap();

    // Same nonce, advanced sequence: unique constraint fires.
    let dup = NewMessage {
        sequence_number: 2,
        ..base
    };
    assert!(matches!(
        f.state.storage.insert_message(&dup).await,
        Err(StorageError::DuplicateNonce)
    ));

    // Fresh nonce, stale sequence: precondition fires.
    let stale = NewMessage {
        sequence_number: 1,
        nonce: "backstop-nonce-2",
        ..base
    };
    assert!(matches!(
        f.state.storage.insert_message(&stale).await,
        Err(StorageError::StaleSequence)
    ));
}
