//! Relay persistence: accounts, ciphertext records, file envelopes.
//!
//! The message insert is the durable backstop behind the in-memory replay
//! gate: `nonce` is globally unique and the per-conversation sequence
//! precondition is re-validated inside the insert transaction. This closes
//! the race where two ingest handlers see the same novel nonce before
//! either has cached it.

use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use cl_proto::api::{StoredFile, StoredMessage};
use cl_proto::record::{CipherRecord, FileEnvelope};

#[derive(Debug, Error)]
pub enum StorageError {
    /// Nonce uniqueness violated at insert. Surfaces to the sender as
    /// `duplicate-nonce`, never as a generic storage error.
    #[error("nonce already accepted")]
    DuplicateNonce,

    /// Sequence precondition violated at insert.
    #[error("sequence number not beyond the last accepted")]
    StaleSequence,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("envelope codec error: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub public_key: String,
    pub algorithm: String,
}

/// Accepted message parameters, post-gate.
pub struct NewMessage<'a> {
    pub sender_id: &'a str,
    pub recipient_id: &'a str,
    pub conversation_id: &'a str,
    pub ciphertext: &'a str,
    pub iv: &'a str,
    pub tag: &'a str,
    pub timestamp: i64,
    pub sequence_number: u64,
    pub nonce: &'a str,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }

    // ── Users ────────────────────────────────────────────────────────────────

    pub async fn insert_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        public_key: &str,
        algorithm: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, public_key, algorithm, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(username)
        .bind(password_hash)
        .bind(public_key)
        .bind(algorithm)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<UserRow>, StorageError> {
        Ok(sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, public_key, algorithm FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<UserRow>, StorageError> {
        Ok(sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, public_key, algorithm FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Highest accepted sequence for a conversation, 0 when none. Feeds the
    /// gate's in-memory tracker on a cold start.
    pub async fn last_sequence(&self, conversation_id: &str) -> Result<u64, StorageError> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sequence_number) FROM messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.unwrap_or(0) as u64)
    }

    /// Insert one accepted message; returns the message id.
    pub async fn insert_message(&self, msg: &NewMessage<'_>) -> Result<String, StorageError> {
        let mut tx = self.pool.begin().await?;

        let last: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sequence_number) FROM messages WHERE conversation_id = ?",
        )
        .bind(msg.conversation_id)
        .fetch_one(&mut *tx)
        .await?;
        if msg.sequence_number <= last.unwrap_or(0) as u64 {
            return Err(StorageError::StaleSequence);
        }

        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO messages
                 (id, conversation_id, sender_id, recipient_id, ciphertext, iv, tag,
                  timestamp, sequence_number, nonce, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(msg.conversation_id)
        .bind(msg.sender_id)
        .bind(msg.recipient_id)
        .bind(msg.ciphertext)
        .bind(msg.iv)
        .bind(msg.tag)
        .bind(msg.timestamp)
        .bind(msg.sequence_number as i64)
        .bind(msg.nonce)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(id)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::DuplicateNonce)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All messages of a conversation, oldest first.
    pub async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows: Vec<(String, String, String, String, String, String, i64, i64, String)> =
            sqlx::query_as(
                "SELECT id, sender_id, recipient_id, ciphertext, iv, tag,
                        timestamp, sequence_number, nonce
                 FROM messages WHERE conversation_id = ?
                 ORDER BY sequence_number ASC",
            )
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, sender_id, recipient_id, ciphertext, iv, tag, timestamp, sequence, nonce)| {
                    StoredMessage {
                        message_id: id,
                        sender_id,
                        recipient_id,
                        record: CipherRecord {
                            ciphertext,
                            iv,
                            tag,
                            timestamp,
                            sequence_number: sequence as u64,
                            nonce,
                        },
                    }
                },
            )
            .collect())
    }

    // ── Files ────────────────────────────────────────────────────────────────

    pub async fn insert_file(
        &self,
        sender_id: &str,
        recipient_id: &str,
        conversation_id: &str,
        envelope: &FileEnvelope,
    ) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        let envelope_json =
            serde_json::to_string(envelope).map_err(|e| StorageError::Codec(e.to_string()))?;
        sqlx::query(
            "INSERT INTO files (id, conversation_id, sender_id, recipient_id, envelope, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(recipient_id)
        .bind(envelope_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn file_by_id(&self, file_id: &str) -> Result<Option<StoredFile>, StorageError> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, sender_id, recipient_id, envelope FROM files WHERE id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::file_from_row).transpose()
    }

    pub async fn conversation_files(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredFile>, StorageError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, sender_id, recipient_id, envelope
             FROM files WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::file_from_row).collect()
    }

    fn file_from_row(
        (id, sender_id, recipient_id, envelope): (String, String, String, String),
    ) -> Result<StoredFile, StorageError> {
        let envelope: FileEnvelope =
            serde_json::from_str(&envelope).map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(StoredFile {
            file_id: id,
            sender_id,
            recipient_id,
            envelope,
        })
    }
}
