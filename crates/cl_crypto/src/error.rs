use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    /// Covers both a wrong key and a tampered ciphertext; callers must not
    /// disclose which.
    #[error("AEAD decryption failed")]
    AeadDecrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// The decoded bytes import under a legacy key purpose or a different
    /// algorithm tag than the one persisted with the blob.
    #[error("Key is in a legacy format")]
    LegacyFormat,

    #[error("Record is missing its replay-protection fields")]
    MissingReplayFields,

    #[error("Record nonce is malformed")]
    BadNonce,

    #[error("Plaintext is not valid UTF-8")]
    InvalidPlaintext(#[from] std::string::FromUtf8Error),

    #[error("File chunk indices are not dense and 0-based")]
    BadChunkIndex,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
