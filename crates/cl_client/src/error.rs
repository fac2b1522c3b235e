use thiserror::Error;

use cl_crypto::CryptoError;
use cl_store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay has no identity key registered for the peer.
    #[error("No identity key registered for peer")]
    NoPeerIdentity,

    /// A handshake flight failed verification (signature or timestamp).
    #[error("Handshake verification failed")]
    BadSignature,

    /// The exchange private was expired or unrecoverable when completing as
    /// initiator.
    #[error("Exchange private no longer available")]
    ExchangeLost,

    /// No established session for the peer; run the handshake first.
    #[error("No established session with peer")]
    NoSession,

    /// The relay rejected the request; `0` is the machine-readable code.
    #[error("Relay rejected request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key store error: {0}")]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}
