//! Canonical form of signed handshake messages.
//!
//! The signature input is the UTF-8 encoding of a JSON object with exactly
//! five fields in a fixed order: `type`, `fromUserId`, `toUserId`,
//! `publicKey`, `timestamp`: one space after each colon and comma, nothing
//! else. Both peers (and the relay, which re-verifies on ingest) MUST produce
//! the exact same byte sequence, so the object is assembled by hand rather
//! than trusted to a serializer's map ordering.

use sha2::{Digest, Sha256};

/// Wire discriminant of the three handshake flights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    Initiate,
    Respond,
    Confirm,
}

impl HandshakeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeKind::Initiate => "INITIATE",
            HandshakeKind::Respond => "RESPOND",
            HandshakeKind::Confirm => "CONFIRM",
        }
    }
}

/// The five signed fields of an INITIATE or RESPOND flight.
#[derive(Debug, Clone)]
pub struct SignedFields<'a> {
    pub kind: HandshakeKind,
    pub from_user_id: &'a str,
    pub to_user_id: &'a str,
    /// Base64 SubjectPublicKeyInfo of the ephemeral P-256 DH public half.
    pub public_key: &'a str,
    /// Sender wall clock, milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

/// Serialize the canonical signing bytes.
///
/// String values pass through `serde_json` so escaping matches any compliant
/// stringifier; layout and field order are fixed here.
pub fn signing_bytes(fields: &SignedFields<'_>) -> Vec<u8> {
    let esc = |s: &str| serde_json::to_string(s).expect("string serialization is infallible");
    format!(
        "{{\"type\": {}, \"fromUserId\": {}, \"toUserId\": {}, \"publicKey\": {}, \"timestamp\": {}}}",
        esc(fields.kind.as_str()),
        esc(fields.from_user_id),
        esc(fields.to_user_id),
        esc(fields.public_key),
        fields.timestamp,
    )
    .into_bytes()
}

/// Hash carried by a CONFIRM flight:
/// `SHA-256("KEY-CONFIRMED" ‖ senderId ‖ recipientId ‖ timestamp)`, hex.
pub fn confirmation_hash(sender_id: &str, recipient_id: &str, timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"KEY-CONFIRMED");
    hasher.update(sender_id.as_bytes());
    hasher.update(recipient_id.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
