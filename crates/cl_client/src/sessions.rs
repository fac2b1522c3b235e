//! Conversation state handle.
//!
//! Maps peer → session key and conversation → sequence counter. This is an
//! explicit handle with interior mutability, not a process-wide global;
//! tests instantiate several independent handles in one process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use cl_crypto::session::SessionKey;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionKey>,
    sequences: HashMap<String, u64>,
}

/// Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct SessionMap {
    inner: Arc<Mutex<Inner>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or overwrite) the session for a peer. A newer handshake may
    /// replace an existing key; the new key applies to all subsequent sends.
    pub fn install(&self, key: SessionKey) {
        self.inner.lock().sessions.insert(key.peer_id.clone(), key);
    }

    /// Active session for a peer. Expired keys are dropped, not returned.
    pub fn get(&self, peer_id: &str) -> Option<SessionKey> {
        let mut inner = self.inner.lock();
        match inner.sessions.get(peer_id) {
            Some(key) if key.is_expired(Utc::now()) => {
                inner.sessions.remove(peer_id);
                None
            }
            Some(key) => Some(key.clone()),
            None => None,
        }
    }

    pub fn remove(&self, peer_id: &str) {
        self.inner.lock().sessions.remove(peer_id);
    }

    /// Next sequence number for a conversation: strictly increasing, 1 on
    /// the first send.
    pub fn next_sequence(&self, conversation_id: &str) -> u64 {
        let mut inner = self.inner.lock();
        let counter = inner.sequences.entry(conversation_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raise the counter to at least `floor` (used to resume a conversation
    /// whose history predates this process).
    pub fn ensure_sequence_at_least(&self, conversation_id: &str, floor: u64) {
        let mut inner = self.inner.lock();
        let counter = inner.sequences.entry(conversation_id.to_string()).or_insert(0);
        if *counter < floor {
            *counter = floor;
        }
    }

    /// Whether a counter exists for the conversation yet.
    pub fn has_sequence(&self, conversation_id: &str) -> bool {
        self.inner.lock().sequences.contains_key(conversation_id)
    }

    /// Drop the counter. Permitted only after a new handshake installed a
    /// fresh session key.
    pub fn reset_sequence(&self, conversation_id: &str) {
        self.inner.lock().sequences.remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sequences_start_at_one_and_increase() {
        let map = SessionMap::new();
        assert_eq!(map.next_sequence("a:b"), 1);
        assert_eq!(map.next_sequence("a:b"), 2);
        assert_eq!(map.next_sequence("a:c"), 1);
    }

    #[test]
    fn ensure_sequence_only_raises() {
        let map = SessionMap::new();
        map.ensure_sequence_at_least("a:b", 10);
        assert_eq!(map.next_sequence("a:b"), 11);
        map.ensure_sequence_at_least("a:b", 5);
        assert_eq!(map.next_sequence("a:b"), 12);
    }

    #[test]
    fn expired_sessions_are_not_returned() {
        let map = SessionMap::new();
        map.install(SessionKey::new(
            [1u8; 32],
            "bob",
            Utc::now() - Duration::minutes(61),
        ));
        assert!(map.get("bob").is_none());
    }

    #[test]
    fn newer_install_overwrites() {
        let map = SessionMap::new();
        map.install(SessionKey::new([1u8; 32], "bob", Utc::now()));
        map.install(SessionKey::new([2u8; 32], "bob", Utc::now()));
        assert_eq!(map.get("bob").unwrap().bytes(), &[2u8; 32]);
    }

    #[test]
    fn handles_are_independent() {
        let a = SessionMap::new();
        let b = SessionMap::new();
        a.install(SessionKey::new([1u8; 32], "bob", Utc::now()));
        assert!(b.get("bob").is_none());
    }
}
