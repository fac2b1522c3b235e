//! Vault: the unlock-once passphrase handle.
//!
//! Store operations need the passphrase to derive a per-blob wrapping key
//! (every blob carries its own salt). Rather than threading a password
//! through the handshake, the caller unlocks the vault once and passes the
//! handle; the handle refuses service after its deadline passes.

use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Default vault lifetime after unlock.
pub const VAULT_TTL_MINUTES: i64 = 30;

/// An unlocked passphrase with a bounded lifetime. Passphrase bytes are
/// zeroized on drop.
pub struct Vault {
    passphrase: Zeroizing<Vec<u8>>,
    expires_at: DateTime<Utc>,
}

impl Vault {
    pub fn unlock(passphrase: &str) -> Self {
        Self::unlock_for(passphrase, Duration::minutes(VAULT_TTL_MINUTES))
    }

    pub fn unlock_for(passphrase: &str, ttl: Duration) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.as_bytes().to_vec()),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_locked(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Passphrase bytes for one wrapping-key derivation.
    pub(crate) fn passphrase(&self) -> Result<&[u8], StoreError> {
        if self.is_locked() {
            return Err(StoreError::VaultLocked);
        }
        Ok(&self.passphrase)
    }
}
