//! SQLite-backed key store.
//!
//! WAL journal mode and foreign-key enforcement are configured at connection
//! time, not inside a migration: SQLite forbids changing `journal_mode`
//! inside a transaction and sqlx wraps every migration in one.
//!
//! Expiry is enforced lazily on read (an expired row answers `NotFound` and
//! is deleted) and eagerly by [`Store::sweep_expired`].

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use zeroize::Zeroizing;

use cl_crypto::exchange::{ExchangePair, EXCHANGE_TTL_MINUTES};
use cl_crypto::identity::{IdentityKeyPair, SigningAlgorithm};
use cl_crypto::session::{SessionKey, SESSION_TTL_MINUTES};
use cl_crypto::{aead, kdf, CryptoError};

use crate::error::StoreError;
use crate::vault::Vault;

/// Central store handle. Cheap to clone (pool is an Arc internally).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path` and run pending
    /// migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    // ── Wrapped-blob helpers ─────────────────────────────────────────────────

    fn wrap(vault: &Vault, plaintext: &[u8]) -> Result<(String, String), StoreError> {
        let salt = kdf::generate_salt();
        let wrapping_key = kdf::wrapping_key_from_password(vault.passphrase()?, &salt);
        let blob = aead::seal_blob(&wrapping_key, plaintext)?;
        Ok((STANDARD.encode(salt), blob))
    }

    fn unwrap(
        vault: &Vault,
        salt_b64: &str,
        blob: &str,
    ) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let salt_bytes = STANDARD
            .decode(salt_b64)
            .map_err(|_| StoreError::WrongPasswordOrCorrupt)?;
        let salt: [u8; kdf::SALT_LEN] = salt_bytes
            .try_into()
            .map_err(|_| StoreError::WrongPasswordOrCorrupt)?;
        let wrapping_key = kdf::wrapping_key_from_password(vault.passphrase()?, &salt);
        Ok(aead::open_blob(&wrapping_key, blob)?)
    }

    // ── Identity privates ────────────────────────────────────────────────────

    /// Replace the identity private for `user_id` atomically; returns after
    /// the write has committed.
    pub async fn store_identity_private(
        &self,
        vault: &Vault,
        user_id: &str,
        key: &IdentityKeyPair,
    ) -> Result<(), StoreError> {
        let pkcs8 = key.export_private()?;
        let (salt, blob) = Self::wrap(vault, &pkcs8)?;
        sqlx::query(
            "INSERT INTO identity_keys (user_id, algorithm, salt, blob, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 algorithm = excluded.algorithm,
                 salt = excluded.salt,
                 blob = excluded.blob,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(key.algorithm().as_str())
        .bind(salt)
        .bind(blob)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_identity_private(
        &self,
        vault: &Vault,
        user_id: &str,
    ) -> Result<IdentityKeyPair, StoreError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT algorithm, salt, blob FROM identity_keys WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let (algorithm, salt, blob) = row.ok_or(StoreError::NotFound)?;
        let pkcs8 = Self::unwrap(vault, &salt, &blob)?;
        let algorithm = SigningAlgorithm::parse(&algorithm)
            .map_err(|e| StoreError::Crypto(e))?;
        Ok(IdentityKeyPair::import_private(algorithm, &pkcs8)?)
    }

    pub async fn delete_identity_private(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM identity_keys WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Exchange privates ────────────────────────────────────────────────────

    pub async fn store_exchange_private(
        &self,
        vault: &Vault,
        exchange_id: &str,
        pair: &ExchangePair,
    ) -> Result<(), StoreError> {
        let pkcs8 = pair.export_private()?;
        let (salt, blob) = Self::wrap(vault, &pkcs8)?;
        sqlx::query(
            "INSERT INTO exchange_keys (exchange_id, salt, blob, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(exchange_id) DO UPDATE SET
                 salt = excluded.salt,
                 blob = excluded.blob,
                 created_at = excluded.created_at",
        )
        .bind(exchange_id)
        .bind(salt)
        .bind(blob)
        .bind(pair.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load an exchange private. Entries past their 10-minute lifetime are
    /// treated as absent and removed.
    pub async fn load_exchange_private(
        &self,
        vault: &Vault,
        exchange_id: &str,
    ) -> Result<ExchangePair, StoreError> {
        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT salt, blob, created_at FROM exchange_keys WHERE exchange_id = ?",
        )
        .bind(exchange_id)
        .fetch_optional(&self.pool)
        .await?;
        let (salt, blob, created_at) = row.ok_or(StoreError::NotFound)?;
        if Utc::now() - created_at > Duration::minutes(EXCHANGE_TTL_MINUTES) {
            self.delete_exchange_private(exchange_id).await?;
            return Err(StoreError::NotFound);
        }
        let pkcs8 = Self::unwrap(vault, &salt, &blob)?;
        Ok(ExchangePair::import_private(&pkcs8, created_at)?)
    }

    pub async fn delete_exchange_private(&self, exchange_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM exchange_keys WHERE exchange_id = ?")
            .bind(exchange_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Session keys ─────────────────────────────────────────────────────────

    pub async fn store_session_key(
        &self,
        vault: &Vault,
        key: &SessionKey,
    ) -> Result<(), StoreError> {
        let (salt, blob) = Self::wrap(vault, key.bytes())?;
        sqlx::query(
            "INSERT INTO session_keys (peer_id, salt, blob, established_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(peer_id) DO UPDATE SET
                 salt = excluded.salt,
                 blob = excluded.blob,
                 established_at = excluded.established_at",
        )
        .bind(&key.peer_id)
        .bind(salt)
        .bind(blob)
        .bind(key.established_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a cached session key. Entries past their 60-minute lifetime are
    /// treated as absent and removed.
    pub async fn load_session_key(
        &self,
        vault: &Vault,
        peer_id: &str,
    ) -> Result<SessionKey, StoreError> {
        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT salt, blob, established_at FROM session_keys WHERE peer_id = ?",
        )
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await?;
        let (salt, blob, established_at) = row.ok_or(StoreError::NotFound)?;
        if Utc::now() - established_at > Duration::minutes(SESSION_TTL_MINUTES) {
            self.delete_session_key(peer_id).await?;
            return Err(StoreError::NotFound);
        }
        let raw = Self::unwrap(vault, &salt, &blob)?;
        let key: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Crypto(CryptoError::InvalidKey(
                "Session key blob is not 32 bytes".into(),
            )))?;
        Ok(SessionKey::new(key, peer_id, established_at))
    }

    pub async fn delete_session_key(&self, peer_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM session_keys WHERE peer_id = ?")
            .bind(peer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Eagerly drop expired exchange privates and session keys.
    pub async fn sweep_expired(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("DELETE FROM exchange_keys WHERE created_at < ?")
            .bind(now - Duration::minutes(EXCHANGE_TTL_MINUTES))
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM session_keys WHERE established_at < ?")
            .bind(now - Duration::minutes(SESSION_TTL_MINUTES))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(&dir.path().join("keys.db")).await.expect("open store")
    }

    #[tokio::test]
    async fn identity_roundtrip_and_wrong_password() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("correct horse");
        let key = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();

        store.store_identity_private(&vault, "alice", &key).await.unwrap();
        let loaded = store.load_identity_private(&vault, "alice").await.unwrap();
        assert_eq!(key.export_public().unwrap(), loaded.export_public().unwrap());

        let wrong = Vault::unlock("battery staple");
        assert!(matches!(
            store.load_identity_private(&wrong, "alice").await,
            Err(StoreError::WrongPasswordOrCorrupt)
        ));
    }

    #[tokio::test]
    async fn absent_entry_is_not_found() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("pw");
        assert!(matches!(
            store.load_identity_private(&vault, "nobody").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn store_replaces_prior_identity() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("pw");
        let first = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();
        let second = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();

        store.store_identity_private(&vault, "alice", &first).await.unwrap();
        store.store_identity_private(&vault, "alice", &second).await.unwrap();
        let loaded = store.load_identity_private(&vault, "alice").await.unwrap();
        assert_eq!(second.export_public().unwrap(), loaded.export_public().unwrap());
    }

    #[tokio::test]
    async fn mismatched_algorithm_tag_surfaces_legacy_format() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("pw");
        let key = IdentityKeyPair::generate_with(SigningAlgorithm::EcdsaP256).unwrap();
        store.store_identity_private(&vault, "alice", &key).await.unwrap();

        // Simulate a row written before the algorithm migration.
        sqlx::query("UPDATE identity_keys SET algorithm = 'RSA-PSS-2048' WHERE user_id = ?")
            .bind("alice")
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(
            store.load_identity_private(&vault, "alice").await,
            Err(StoreError::LegacyFormat)
        ));
    }

    #[tokio::test]
    async fn expired_exchange_private_is_silently_absent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("pw");
        let pair = ExchangePair::generate();
        store.store_exchange_private(&vault, "ex-1", &pair).await.unwrap();

        sqlx::query("UPDATE exchange_keys SET created_at = ? WHERE exchange_id = ?")
            .bind(Utc::now() - Duration::minutes(EXCHANGE_TTL_MINUTES + 1))
            .bind("ex-1")
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(
            store.load_exchange_private(&vault, "ex-1").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn session_key_roundtrip_and_expiry() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("pw");
        let key = SessionKey::new([7u8; 32], "bob", Utc::now());
        store.store_session_key(&vault, &key).await.unwrap();

        let loaded = store.load_session_key(&vault, "bob").await.unwrap();
        assert_eq!(loaded.bytes(), key.bytes());

        sqlx::query("UPDATE session_keys SET established_at = ? WHERE peer_id = ?")
            .bind(Utc::now() - Duration::minutes(SESSION_TTL_MINUTES + 1))
            .bind("bob")
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(matches!(
            store.load_session_key(&vault, "bob").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        store.delete_identity_private("ghost").await.unwrap();
        store.delete_exchange_private("ghost").await.unwrap();
        store.delete_session_key("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_expired_rows() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let vault = Vault::unlock("pw");
        let pair = ExchangePair::generate();
        store.store_exchange_private(&vault, "ex-old", &pair).await.unwrap();
        sqlx::query("UPDATE exchange_keys SET created_at = ?")
            .bind(Utc::now() - Duration::minutes(EXCHANGE_TTL_MINUTES + 5))
            .execute(&store.pool)
            .await
            .unwrap();

        store.sweep_expired().await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exchange_keys")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
