//! Conversation orchestration over an established session.

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::warn;

use cl_crypto::codec;
use cl_crypto::identity::IdentityKeyPair;
use cl_crypto::session::SessionKey;
use cl_proto::api::{SendMessageRequest, StoredFile, UploadFileRequest};
use cl_proto::conversation_id;
use cl_store::{Store, Vault};

use crate::error::ClientError;
use crate::handshake::{Handshake, HandshakeState};
use crate::relay::RelayApi;
use crate::sessions::SessionMap;

/// A decrypted (or redacted) incoming message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub sender_id: String,
    /// `None` when the record could not be decrypted; rendered as a
    /// redacted placeholder, never as an error detail.
    pub text: Option<String>,
    pub timestamp: i64,
    pub sequence_number: u64,
}

/// One user's client core. Holds the unlocked store, the identity, and the
/// session map; talks to the relay through the [`RelayApi`] trait.
pub struct Client<R: RelayApi> {
    relay: R,
    store: Store,
    vault: Vault,
    sessions: SessionMap,
    identity: IdentityKeyPair,
    self_id: String,
}

impl<R: RelayApi> Client<R> {
    pub fn new(
        relay: R,
        store: Store,
        vault: Vault,
        identity: IdentityKeyPair,
        self_id: &str,
    ) -> Self {
        Self {
            relay,
            store,
            vault,
            sessions: SessionMap::new(),
            identity,
            self_id: self_id.to_string(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// Open (or resume) the conversation with `peer_id` by running the
    /// handshake resolution algorithm.
    pub async fn open_conversation(&self, peer_id: &str) -> HandshakeState {
        let handshake = Handshake {
            relay: &self.relay,
            store: &self.store,
            vault: &self.vault,
            sessions: &self.sessions,
            self_id: &self.self_id,
            identity: &self.identity,
        };
        handshake.resolve(peer_id).await
    }

    fn session_for(&self, peer_id: &str) -> Result<SessionKey, ClientError> {
        self.sessions.get(peer_id).ok_or(ClientError::NoSession)
    }

    /// Continue the conversation's sequence from its stored history the
    /// first time this process sends into it. The relay tracks one counter
    /// per unordered conversation, so the seed spans both directions.
    async fn seed_sequence(&self, peer_id: &str, conversation: &str) -> Result<(), ClientError> {
        if self.sessions.has_sequence(conversation) {
            return Ok(());
        }
        let history = self.relay.fetch_conversation(peer_id).await?;
        let last_accepted = history
            .messages
            .iter()
            .map(|m| m.record.sequence_number)
            .max()
            .unwrap_or(0);
        self.sessions.ensure_sequence_at_least(conversation, last_accepted);
        Ok(())
    }

    /// Encrypt and submit one text message.
    pub async fn send_message(&self, peer_id: &str, plaintext: &str) -> Result<(), ClientError> {
        let key = self.session_for(peer_id)?;
        let conversation = conversation_id(&self.self_id, peer_id);
        self.seed_sequence(peer_id, &conversation).await?;
        let sequence = self.sessions.next_sequence(&conversation);
        let record = codec::encrypt_message(&key, plaintext, sequence)?;
        self.relay
            .send_message(&SendMessageRequest {
                recipient_id: peer_id.to_string(),
                ciphertext: record.ciphertext,
                iv: record.iv,
                tag: record.tag,
                timestamp: Some(record.timestamp),
                sequence_number: Some(record.sequence_number),
                nonce: Some(record.nonce),
            })
            .await?;
        Ok(())
    }

    /// Fetch and decrypt the conversation, oldest first. Records that fail
    /// to decrypt become redacted placeholders; the fetch never aborts on
    /// them.
    pub async fn fetch_messages(&self, peer_id: &str) -> Result<Vec<IncomingMessage>, ClientError> {
        let key = self.session_for(peer_id)?;
        let history = self.relay.fetch_conversation(peer_id).await?;
        let mut out = Vec::with_capacity(history.messages.len());
        for message in history.messages {
            let text = match codec::decrypt_message(&key, &message.record) {
                Ok(text) => Some(text),
                Err(e) => {
                    // Redacted: no plaintext, no key material, no cause split.
                    warn!(sender = %message.sender_id, error = %e, "undecipherable record");
                    None
                }
            };
            out.push(IncomingMessage {
                sender_id: message.sender_id,
                text,
                timestamp: message.record.timestamp,
                sequence_number: message.record.sequence_number,
            });
        }
        Ok(out)
    }

    /// Encrypt and upload a file as independently sealed 1 MiB chunks.
    pub async fn send_file(
        &self,
        peer_id: &str,
        file_name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<String, ClientError> {
        let key = self.session_for(peer_id)?;
        let envelope = codec::encrypt_file(&key, file_name, mime_type, content)?;
        let ack = self
            .relay
            .upload_file(&UploadFileRequest {
                recipient_id: peer_id.to_string(),
                envelope,
            })
            .await?;
        Ok(ack.file_id)
    }

    /// Download and reassemble one file.
    pub async fn fetch_file(&self, peer_id: &str, file_id: &str) -> Result<Vec<u8>, ClientError> {
        let key = self.session_for(peer_id)?;
        let stored = self.relay.fetch_file(file_id).await?;
        Ok(codec::decrypt_file(&key, &stored.envelope)?)
    }

    /// List file envelopes exchanged with a peer (metadata only; chunks stay
    /// sealed until `fetch_file`).
    pub async fn list_files(&self, peer_id: &str) -> Result<Vec<StoredFile>, ClientError> {
        Ok(self.relay.conversation_files(peer_id).await?.files)
    }

    /// Export this client's identity public half (base64 SPKI), e.g. for
    /// registration.
    pub fn public_key_b64(&self) -> Result<String, ClientError> {
        Ok(STANDARD.encode(self.identity.export_public()?))
    }
}
