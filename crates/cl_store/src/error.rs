use thiserror::Error;

use cl_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An AEAD tag mismatch on unwrap. Wrong password and tampered blob are
    /// indistinguishable by design; the distinction is never exposed.
    #[error("Wrong password or corrupted key store entry")]
    WrongPasswordOrCorrupt,

    #[error("Entry not found")]
    NotFound,

    /// The unwrapped bytes import under a legacy key purpose.
    #[error("Stored key is in a legacy format")]
    LegacyFormat,

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AeadDecrypt => StoreError::WrongPasswordOrCorrupt,
            CryptoError::LegacyFormat => StoreError::LegacyFormat,
            other => StoreError::Crypto(other),
        }
    }
}
