//! The two-flight signed-ECDH handshake state machine.
//!
//! Opening a conversation runs a resolution algorithm whose priority order
//! lets two peers who open simultaneously converge on one session without
//! coordination:
//!
//! 1. a usable session key already exists            → `Established`
//! 2. the relay holds an unanswered INITIATE for us  → responder path
//! 3. the relay holds a response to our INITIATE     → initiator completion
//! 4. otherwise                                      → send INITIATE
//!
//! Rule 2 beating rule 3 and 4 is what resolves simultaneous opens: a peer
//! that finds an incoming INITIATE answers it instead of creating (or
//! finishing) a competing exchange.
//!
//! Before any shared secret is computed, the counter-party's signature over
//! the canonical flight bytes is verified against their identity key as
//! registered at the relay, and the flight timestamp is range-checked
//! against the local clock. Either check failing is fatal.

use chrono::Utc;
use tracing::{debug, warn};

use cl_crypto::exchange::ExchangePair;
use cl_crypto::identity::{self, IdentityKeyPair, SigningAlgorithm};
use cl_crypto::session::SessionKey;
use cl_proto::api::{ConfirmRequest, ExchangeResponseRequest, InitiateRequest};
use cl_proto::canonical::{confirmation_hash, signing_bytes, HandshakeKind, SignedFields};

use cl_store::{Store, StoreError, Vault};

use crate::error::ClientError;
use crate::relay::RelayApi;
use crate::sessions::SessionMap;

/// Permitted skew between a flight timestamp and the local clock.
const HANDSHAKE_SKEW_MS: i64 = 5 * 60 * 1000;

/// Terminal failure reasons. The caller retries from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The relay has no identity key for the peer.
    NoPeerIdentity,
    /// Signature or timestamp verification failed on a flight.
    BadSignature,
    /// Our exchange private expired or could not be unwrapped while
    /// completing as initiator. A fresh open starts a new exchange.
    ExchangeLost,
    /// Relay or network failure; retry is the caller's choice.
    Transport,
}

/// Per-{self, peer} handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    /// Initiator: local ExchangePair persisted, INITIATE submitted.
    AwaitingResponse { exchange_id: String },
    /// Responder: session derived, waiting for the initiator's CONFIRM.
    AwaitingConfirm,
    Established,
    Failed { reason: FailureReason },
}

/// Everything the resolution algorithm touches. The store knows nothing
/// about handshakes; the dependency is strictly one-way.
pub struct Handshake<'a> {
    pub relay: &'a dyn RelayApi,
    pub store: &'a Store,
    pub vault: &'a Vault,
    pub sessions: &'a SessionMap,
    pub self_id: &'a str,
    pub identity: &'a IdentityKeyPair,
}

impl<'a> Handshake<'a> {
    /// Run the resolution algorithm for a conversation with `peer_id`.
    /// Fatal failures are reported as `Failed{reason}`, not panics or raw
    /// errors; the caller decides whether to retry from `Idle`.
    pub async fn resolve(&self, peer_id: &str) -> HandshakeState {
        match self.try_resolve(peer_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(peer = peer_id, error = %e, "handshake failed");
                HandshakeState::Failed {
                    reason: Self::classify(&e),
                }
            }
        }
    }

    fn classify(e: &ClientError) -> FailureReason {
        match e {
            ClientError::NoPeerIdentity => FailureReason::NoPeerIdentity,
            ClientError::BadSignature => FailureReason::BadSignature,
            ClientError::ExchangeLost => FailureReason::ExchangeLost,
            ClientError::Crypto(_) => FailureReason::BadSignature,
            ClientError::Rejected(code) if code == "invalid-signature" => {
                FailureReason::BadSignature
            }
            _ => FailureReason::Transport,
        }
    }

    async fn try_resolve(&self, peer_id: &str) -> Result<HandshakeState, ClientError> {
        // 1. An existing session wins outright.
        if self.sessions.get(peer_id).is_some() {
            return Ok(HandshakeState::Established);
        }
        match self.store.load_session_key(self.vault, peer_id).await {
            Ok(key) => {
                self.sessions.install(key);
                return Ok(HandshakeState::Established);
            }
            Err(StoreError::NotFound) => {}
            // A cached key we cannot unwrap does not block a fresh handshake.
            Err(StoreError::WrongPasswordOrCorrupt) => {
                debug!(peer = peer_id, "cached session key not unwrappable, renegotiating");
            }
            Err(e) => return Err(e.into()),
        }

        // 2. Answer an incoming INITIATE before anything else.
        let pending = self
            .relay
            .pending_exchanges(peer_id)
            .await?
            .exchanges;
        if let Some(exchange) = pending.into_iter().next() {
            return self.respond(peer_id, exchange).await;
        }

        // 3. Complete our own exchange if the responder has answered.
        let responses = self
            .relay
            .exchange_responses(peer_id)
            .await?
            .responses;
        if let Some(response) = responses.into_iter().next() {
            return self.complete(peer_id, response).await;
        }

        // 4. Open a fresh exchange.
        self.initiate(peer_id).await
    }

    /// Responder path: verify the INITIATE, answer with our own signed
    /// ephemeral, derive, persist, confirm.
    async fn respond(
        &self,
        peer_id: &str,
        exchange: cl_proto::api::PendingExchangeInfo,
    ) -> Result<HandshakeState, ClientError> {
        let peer_key = self.peer_identity(&exchange.initiator_id).await?;
        self.verify_flight(
            HandshakeKind::Initiate,
            &exchange.initiator_id,
            self.self_id,
            &exchange.public_key,
            exchange.timestamp,
            &exchange.signature,
            &peer_key,
        )?;

        let pair = ExchangePair::generate();
        let timestamp = Utc::now().timestamp_millis();
        let public_key = pair.public_spki_b64()?;
        let signature = self.sign_flight(
            HandshakeKind::Respond,
            self.self_id,
            &exchange.initiator_id,
            &public_key,
            timestamp,
        )?;
        self.relay
            .respond_exchange(&ExchangeResponseRequest {
                exchange_id: exchange.exchange_id.clone(),
                public_key,
                signature,
                timestamp,
            })
            .await?;

        let z = pair.shared_secret(&exchange.public_key)?;
        self.install_session(peer_id, &z).await?;
        let both_confirmed = self.confirm(&exchange.exchange_id, peer_id).await?;

        debug!(peer = peer_id, exchange = %exchange.exchange_id, "responder path derived session");
        // The session is usable immediately; the state only reaches
        // Established once the initiator's confirmation lands.
        Ok(if both_confirmed {
            HandshakeState::Established
        } else {
            HandshakeState::AwaitingConfirm
        })
    }

    /// Initiator-completion path: re-load our ephemeral, verify the RESPOND,
    /// derive, persist, confirm, destroy the ephemeral.
    async fn complete(
        &self,
        peer_id: &str,
        response: cl_proto::api::ExchangeResponseInfo,
    ) -> Result<HandshakeState, ClientError> {
        let pair = match self
            .store
            .load_exchange_private(self.vault, &response.exchange_id)
            .await
        {
            Ok(pair) => pair,
            Err(StoreError::NotFound) | Err(StoreError::WrongPasswordOrCorrupt) => {
                return Err(ClientError::ExchangeLost)
            }
            Err(e) => return Err(e.into()),
        };

        // The relay echoes our INITIATE fields back; re-verify our own
        // signature over them so a substituted ephemeral (or a tampered
        // echo) is caught before any secret is derived.
        if response.original_public_key != pair.public_spki_b64()? {
            warn!(event = "invalid_signature", peer = peer_id, "echoed ephemeral differs from ours");
            return Err(ClientError::BadSignature);
        }
        let own_key = self.peer_identity(self.self_id).await?;
        self.verify_flight(
            HandshakeKind::Initiate,
            self.self_id,
            peer_id,
            &response.original_public_key,
            response.original_timestamp,
            &response.original_signature,
            &own_key,
        )?;

        let peer_key = self.peer_identity(&response.responder_id).await?;
        self.verify_flight(
            HandshakeKind::Respond,
            &response.responder_id,
            self.self_id,
            &response.response_public_key,
            response.response_timestamp,
            &response.response_signature,
            &peer_key,
        )?;

        let z = pair.shared_secret(&response.response_public_key)?;
        self.install_session(peer_id, &z).await?;
        self.confirm(&response.exchange_id, peer_id).await?;
        self.store
            .delete_exchange_private(&response.exchange_id)
            .await?;

        debug!(peer = peer_id, exchange = %response.exchange_id, "initiator completion established");
        Ok(HandshakeState::Established)
    }

    /// Initiator path: generate, persist, sign, submit.
    async fn initiate(&self, peer_id: &str) -> Result<HandshakeState, ClientError> {
        let pair = ExchangePair::generate();
        let timestamp = Utc::now().timestamp_millis();
        let public_key = pair.public_spki_b64()?;
        let signature = self.sign_flight(
            HandshakeKind::Initiate,
            self.self_id,
            peer_id,
            &public_key,
            timestamp,
        )?;
        let ack = self
            .relay
            .initiate_exchange(&InitiateRequest {
                recipient_id: peer_id.to_string(),
                public_key,
                signature,
                timestamp,
            })
            .await?;
        self.store
            .store_exchange_private(self.vault, &ack.exchange_id, &pair)
            .await?;

        debug!(peer = peer_id, exchange = %ack.exchange_id, "initiate submitted");
        Ok(HandshakeState::AwaitingResponse {
            exchange_id: ack.exchange_id,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn peer_identity(
        &self,
        user_id: &str,
    ) -> Result<(SigningAlgorithm, String), ClientError> {
        let info = self.relay.fetch_public_key(user_id).await?;
        let algorithm = SigningAlgorithm::parse(&info.algorithm)?;
        Ok((algorithm, info.public_key))
    }

    fn sign_flight(
        &self,
        kind: HandshakeKind,
        from: &str,
        to: &str,
        public_key: &str,
        timestamp: i64,
    ) -> Result<String, ClientError> {
        let bytes = signing_bytes(&SignedFields {
            kind,
            from_user_id: from,
            to_user_id: to,
            public_key,
            timestamp,
        });
        Ok(self.identity.sign_b64(&bytes)?)
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_flight(
        &self,
        kind: HandshakeKind,
        from: &str,
        to: &str,
        public_key: &str,
        timestamp: i64,
        signature: &str,
        peer_key: &(SigningAlgorithm, String),
    ) -> Result<(), ClientError> {
        let now = Utc::now().timestamp_millis();
        if (now - timestamp).abs() > HANDSHAKE_SKEW_MS {
            warn!(event = "invalid_signature", from, "handshake timestamp outside window");
            return Err(ClientError::BadSignature);
        }
        let bytes = signing_bytes(&SignedFields {
            kind,
            from_user_id: from,
            to_user_id: to,
            public_key,
            timestamp,
        });
        identity::verify_b64(peer_key.0, &peer_key.1, &bytes, signature).map_err(|_| {
            warn!(event = "invalid_signature", from, "handshake signature rejected");
            ClientError::BadSignature
        })
    }

    /// Derive the role-agnostic session key, install it in memory and in the
    /// store.
    async fn install_session(&self, peer_id: &str, z: &[u8; 32]) -> Result<(), ClientError> {
        let key = SessionKey::derive(z, self.self_id, peer_id)?;
        self.store.store_session_key(self.vault, &key).await?;
        self.sessions.install(key);
        Ok(())
    }

    async fn confirm(&self, exchange_id: &str, peer_id: &str) -> Result<bool, ClientError> {
        let timestamp = Utc::now().timestamp_millis();
        let ack = self
            .relay
            .confirm_exchange(&ConfirmRequest {
                exchange_id: exchange_id.to_string(),
                confirmation_hash: confirmation_hash(self.self_id, peer_id, timestamp),
            })
            .await?;
        Ok(ack.both_confirmed)
    }
}
