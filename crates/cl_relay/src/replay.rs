//! The three-layer replay gate.
//!
//! Runs on every message-send request after authentication and before
//! persistence. Layers, evaluated in order with the first failure
//! short-circuiting:
//!
//! 1. field presence (nonce, timestamp, sequence number)
//! 2. timestamp freshness: within 5 minutes past, 1 minute future skew
//! 3. nonce never previously accepted (in-memory cache, horizon = window)
//! 4. sequence strictly above the last accepted for the conversation
//!
//! The nonce cache and sequence tracker live behind one mutex; the check
//! and the insert happen inside the same critical section, which makes
//! accept decisions linearizable per conversation. The persistent store is
//! only consulted to seed a missing sequence entry (cold start), outside
//! the critical section, and its nonce UNIQUE constraint remains the
//! durable backstop for the remaining race.
//!
//! Every outcome, pass or reject, produces a structured audit record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;

use crate::audit::AuditLog;
use crate::storage::Storage;

/// Freshness window W.
pub const FRESHNESS_WINDOW_MS: i64 = 5 * 60 * 1000;
/// Permitted clock skew into the future F.
pub const FUTURE_SKEW_MS: i64 = 60 * 1000;
/// Sequence gaps beyond this are logged (never rejected).
pub const GAP_WARN_THRESHOLD: u64 = 10;
/// Cadence of the background cache sweep.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// What the cache remembers about an accepted nonce; echoed into the audit
/// record when a duplicate arrives.
#[derive(Debug, Clone)]
pub struct NonceCacheEntry {
    pub timestamp: i64,
    pub sender: String,
    pub recipient: String,
    pub sequence: u64,
    pub accepted_at: i64,
}

/// First-failure rejection, carrying the wire error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    MissingFields,
    FromFuture,
    TooOld,
    DuplicateNonce,
    InvalidSequence,
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::MissingFields => "missing-replay-fields",
            GateRejection::FromFuture => "message-from-future",
            GateRejection::TooOld => "message-too-old",
            GateRejection::DuplicateNonce => "duplicate-nonce",
            GateRejection::InvalidSequence => "invalid-sequence-number",
        }
    }
}

#[derive(Default)]
struct GateInner {
    nonces: HashMap<String, NonceCacheEntry>,
    sequences: HashMap<String, u64>,
}

/// Shared gate handle; clone freely.
#[derive(Clone, Default)]
pub struct ReplayGate {
    inner: Arc<Mutex<GateInner>>,
}

/// An ingest as seen by the gate. Sender identity comes from the
/// authenticated session, never from the body.
pub struct GateInput<'a> {
    pub sender_id: &'a str,
    pub recipient_id: &'a str,
    pub conversation_id: &'a str,
    pub timestamp: Option<i64>,
    pub sequence_number: Option<u64>,
    pub nonce: Option<&'a str>,
}

impl ReplayGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate all layers for one ingest. On accept, the nonce is cached
    /// and the sequence tracker advanced before returning.
    pub async fn check(
        &self,
        storage: &Storage,
        audit: &AuditLog,
        input: &GateInput<'_>,
    ) -> Result<(), GateRejection> {
        let now = Utc::now().timestamp_millis();

        // 1. Field presence.
        let (Some(timestamp), Some(sequence), Some(nonce)) =
            (input.timestamp, input.sequence_number, input.nonce)
        else {
            audit.record(
                "replay_protection_missing_fields",
                json!({
                    "sender": input.sender_id,
                    "recipient": input.recipient_id,
                    "hasTimestamp": input.timestamp.is_some(),
                    "hasSequence": input.sequence_number.is_some(),
                    "hasNonce": input.nonce.is_some(),
                }),
            );
            return Err(GateRejection::MissingFields);
        };

        // 2. Timestamp window.
        let delta = now - timestamp;
        if delta < -FUTURE_SKEW_MS {
            audit.record(
                "replay_attack_future_timestamp",
                json!({
                    "sender": input.sender_id,
                    "recipient": input.recipient_id,
                    "timestamp": timestamp,
                    "aheadMs": -delta,
                }),
            );
            return Err(GateRejection::FromFuture);
        }
        if delta > FRESHNESS_WINDOW_MS {
            audit.record(
                "replay_attack_old_timestamp",
                json!({
                    "sender": input.sender_id,
                    "recipient": input.recipient_id,
                    "timestamp": timestamp,
                    "ageMs": delta,
                }),
            );
            return Err(GateRejection::TooOld);
        }

        // Seed the sequence tracker from storage on a cold start, before
        // taking the decision lock.
        let needs_seed = !self
            .inner
            .lock()
            .sequences
            .contains_key(input.conversation_id);
        let seed = if needs_seed {
            match storage.last_sequence(input.conversation_id).await {
                Ok(last) => Some(last),
                Err(e) => {
                    warn!(error = %e, "sequence seed lookup failed, assuming fresh conversation");
                    Some(0)
                }
            }
        } else {
            None
        };

        // 3 + 4. Nonce uniqueness and sequence monotonicity under one lock:
        // the check and the insert are a single critical section.
        let mut inner = self.inner.lock();
        if let Some(seed) = seed {
            let entry = inner
                .sequences
                .entry(input.conversation_id.to_string())
                .or_insert(0);
            if *entry < seed {
                *entry = seed;
            }
        }

        if let Some(prior) = inner.nonces.get(nonce) {
            audit.record(
                "replay_attack_duplicate_nonce",
                json!({
                    "sender": input.sender_id,
                    "recipient": input.recipient_id,
                    "nonce": nonce,
                    "previous": {
                        "timestamp": prior.timestamp,
                        "sender": prior.sender,
                        "recipient": prior.recipient,
                        "sequence": prior.sequence,
                        "acceptedAt": prior.accepted_at,
                    },
                }),
            );
            return Err(GateRejection::DuplicateNonce);
        }

        let last_seen = inner
            .sequences
            .get(input.conversation_id)
            .copied()
            .unwrap_or(0);
        if sequence <= last_seen {
            audit.record(
                "replay_attack_invalid_sequence",
                json!({
                    "sender": input.sender_id,
                    "recipient": input.recipient_id,
                    "sequence": sequence,
                    "lastSeen": last_seen,
                }),
            );
            return Err(GateRejection::InvalidSequence);
        }

        // 5. Gap observation (informational only).
        if sequence - last_seen > GAP_WARN_THRESHOLD {
            audit.record(
                "replay_protection_sequence_gap",
                json!({
                    "sender": input.sender_id,
                    "recipient": input.recipient_id,
                    "sequence": sequence,
                    "lastSeen": last_seen,
                    "gap": sequence - last_seen,
                }),
            );
        }

        // 6. Accept.
        inner.nonces.insert(
            nonce.to_string(),
            NonceCacheEntry {
                timestamp,
                sender: input.sender_id.to_string(),
                recipient: input.recipient_id.to_string(),
                sequence,
                accepted_at: now,
            },
        );
        inner
            .sequences
            .insert(input.conversation_id.to_string(), sequence);
        drop(inner);

        audit.record(
            "replay_protection_passed",
            json!({
                "sender": input.sender_id,
                "recipient": input.recipient_id,
                "sequence": sequence,
                "nonce": nonce,
            }),
        );
        Ok(())
    }

    /// Evict cache entries older than the freshness window.
    pub fn sweep(&self) {
        let horizon = Utc::now().timestamp_millis() - FRESHNESS_WINDOW_MS;
        let mut inner = self.inner.lock();
        inner.nonces.retain(|_, entry| entry.accepted_at >= horizon);
    }

    #[cfg(test)]
    fn cached_nonces(&self) -> usize {
        self.inner.lock().nonces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn fixture() -> (Storage, AuditLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("relay.db")).await.unwrap();
        let audit = AuditLog::new(dir.path().join("audit")).unwrap();
        (storage, audit, dir)
    }

    fn input<'a>(
        nonce: &'a str,
        timestamp: i64,
        sequence: u64,
    ) -> GateInput<'a> {
        GateInput {
            sender_id: "alice",
            recipient_id: "bob",
            conversation_id: "alice:bob",
            timestamp: Some(timestamp),
            sequence_number: Some(sequence),
            nonce: Some(nonce),
        }
    }

    #[tokio::test]
    async fn accepts_fresh_ingest_then_rejects_replay() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let now = Utc::now().timestamp_millis();

        gate.check(&storage, &audit, &input("n-1", now, 1)).await.unwrap();
        // Verbatim resubmission: one acceptance, then duplicate-nonce.
        let err = gate.check(&storage, &audit, &input("n-1", now, 1)).await;
        assert_eq!(err, Err(GateRejection::DuplicateNonce));
    }

    #[tokio::test]
    async fn missing_fields_short_circuit() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let err = gate
            .check(
                &storage,
                &audit,
                &GateInput {
                    sender_id: "alice",
                    recipient_id: "bob",
                    conversation_id: "alice:bob",
                    timestamp: None,
                    sequence_number: Some(1),
                    nonce: Some("n-1"),
                },
            )
            .await;
        assert_eq!(err, Err(GateRejection::MissingFields));
    }

    #[tokio::test]
    async fn stale_and_future_timestamps_rejected() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let now = Utc::now().timestamp_millis();

        let old = now - FRESHNESS_WINDOW_MS - 1_000;
        assert_eq!(
            gate.check(&storage, &audit, &input("n-old", old, 1)).await,
            Err(GateRejection::TooOld)
        );

        let future = now + FUTURE_SKEW_MS + 1_000;
        assert_eq!(
            gate.check(&storage, &audit, &input("n-future", future, 1)).await,
            Err(GateRejection::FromFuture)
        );
    }

    #[tokio::test]
    async fn sequence_rewind_rejected() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let now = Utc::now().timestamp_millis();

        gate.check(&storage, &audit, &input("n-1", now, 1)).await.unwrap();
        assert_eq!(
            gate.check(&storage, &audit, &input("n-2", now, 1)).await,
            Err(GateRejection::InvalidSequence)
        );
        assert_eq!(
            gate.check(&storage, &audit, &input("n-3", now, 0)).await,
            Err(GateRejection::InvalidSequence)
        );
        // Forward progress still fine.
        gate.check(&storage, &audit, &input("n-4", now, 2)).await.unwrap();
    }

    #[tokio::test]
    async fn large_gap_is_logged_not_rejected() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let now = Utc::now().timestamp_millis();

        gate.check(&storage, &audit, &input("n-1", now, 1)).await.unwrap();
        gate.check(&storage, &audit, &input("n-2", now, 50)).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_evicts_entries_past_horizon() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let now = Utc::now().timestamp_millis();

        gate.check(&storage, &audit, &input("n-1", now, 1)).await.unwrap();
        assert_eq!(gate.cached_nonces(), 1);

        // Backdate the accepted-at past the horizon, then sweep.
        {
            let mut inner = gate.inner.lock();
            inner.nonces.get_mut("n-1").unwrap().accepted_at =
                now - FRESHNESS_WINDOW_MS - 1_000;
        }
        gate.sweep();
        assert_eq!(gate.cached_nonces(), 0);
    }

    #[tokio::test]
    async fn independent_conversations_do_not_interfere() {
        let (storage, audit, _dir) = fixture().await;
        let gate = ReplayGate::new();
        let now = Utc::now().timestamp_millis();

        gate.check(&storage, &audit, &input("n-1", now, 5)).await.unwrap();
        let other = GateInput {
            sender_id: "carol",
            recipient_id: "dave",
            conversation_id: "carol:dave",
            timestamp: Some(now),
            sequence_number: Some(1),
            nonce: Some("n-2"),
        };
        gate.check(&storage, &audit, &other).await.unwrap();
    }
}
