//! Full-stack scenario: two real clients against a served relay.

use tempfile::TempDir;

use cl_client::client::Client;
use cl_client::error::ClientError;
use cl_client::handshake::HandshakeState;
use cl_client::relay::{HttpRelay, RelayApi};
use cl_crypto::codec;
use cl_crypto::identity::{IdentityKeyPair, SigningAlgorithm};
use cl_proto::api::{RegisterRequest, SendMessageRequest};
use cl_relay::{build_router, spawn_sweepers, AppState};
use cl_store::{Store, Vault};

async fn serve(dir: &TempDir) -> String {
    let state = AppState::open(&dir.path().join("relay.db"), &dir.path().join("audit"))
        .await
        .unwrap();
    spawn_sweepers(&state);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn signup(
    base_url: &str,
    dir: &TempDir,
    username: &str,
) -> (Client<HttpRelay>, String) {
    let identity = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();
    let relay = HttpRelay::new(base_url);
    let auth = relay
        .register(&RegisterRequest {
            username: username.to_string(),
            password: "correct horse battery staple".to_string(),
            public_key: identity.export_public_b64().unwrap(),
            algorithm: identity.algorithm().as_str().to_string(),
        })
        .await
        .unwrap();
    let user_id = auth.user.id.clone();
    let store = Store::open(&dir.path().join(format!("{username}.db")))
        .await
        .unwrap();
    let client = Client::new(relay, store, Vault::unlock("pw"), identity, &user_id);
    (client, user_id)
}

#[tokio::test]
async fn two_clients_handshake_and_chat_over_http() {
    let dir = TempDir::new().unwrap();
    let base_url = serve(&dir).await;

    let (alice, alice_id) = signup(&base_url, &dir, "alice").await;
    let (bob, bob_id) = signup(&base_url, &dir, "bob").await;

    // A opens with B offline, then B answers, then A completes.
    assert!(matches!(
        alice.open_conversation(&bob_id).await,
        HandshakeState::AwaitingResponse { .. }
    ));
    assert_eq!(
        bob.open_conversation(&alice_id).await,
        HandshakeState::AwaitingConfirm
    );
    assert_eq!(alice.open_conversation(&bob_id).await, HandshakeState::Established);

    assert_eq!(
        alice.sessions().get(&bob_id).unwrap().bytes(),
        bob.sessions().get(&alice_id).unwrap().bytes(),
    );

    // Text both ways.
    alice.send_message(&bob_id, "hello").await.unwrap();
    bob.send_message(&alice_id, "hi back").await.unwrap();

    let inbox = bob.fetch_messages(&alice_id).await.unwrap();
    let texts: Vec<_> = inbox.iter().filter_map(|m| m.text.as_deref()).collect();
    assert!(texts.contains(&"hello"));
    assert!(texts.contains(&"hi back"));

    // A file survives the trip chunked.
    let content: Vec<u8> = (0..300_000).map(|i| (i % 251) as u8).collect();
    let file_id = alice
        .send_file(&bob_id, "notes.txt", "text/plain", &content)
        .await
        .unwrap();
    assert_eq!(bob.fetch_file(&alice_id, &file_id).await.unwrap(), content);
}

#[tokio::test]
async fn replaying_a_captured_record_is_rejected_end_to_end() {
    let dir = TempDir::new().unwrap();
    let base_url = serve(&dir).await;

    let (alice, alice_id) = signup(&base_url, &dir, "alice").await;
    let (bob, bob_id) = signup(&base_url, &dir, "bob").await;

    alice.open_conversation(&bob_id).await;
    bob.open_conversation(&alice_id).await;
    alice.open_conversation(&bob_id).await;
    alice.send_message(&bob_id, "first").await.unwrap();

    // Capture a valid record and submit it twice.
    let key = alice.sessions().get(&bob_id).unwrap();
    let record = codec::encrypt_message(&key, "captured", 2).unwrap();
    let request = SendMessageRequest {
        recipient_id: bob_id.clone(),
        ciphertext: record.ciphertext,
        iv: record.iv,
        tag: record.tag,
        timestamp: Some(record.timestamp),
        sequence_number: Some(record.sequence_number),
        nonce: Some(record.nonce),
    };
    alice.relay().send_message(&request).await.unwrap();

    match alice.relay().send_message(&request).await {
        Err(ClientError::Rejected(code)) => assert_eq!(code, "duplicate-nonce"),
        other => panic!("expected duplicate-nonce rejection, got {other:?}"),
    }

    // Bob still sees exactly the two legitimate messages.
    let inbox = bob.fetch_messages(&alice_id).await.unwrap();
    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[1].text.as_deref(), Some("captured"));
}
