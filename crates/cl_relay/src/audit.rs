//! Security audit trail.
//!
//! One JSON object per line, appended to a daily-rotating file
//! (`audit-YYYY-MM-DD.log`) in the configured directory. Every
//! security-relevant event on the ingest path lands here; operational
//! logging stays on `tracing`.
//!
//! Appends are best-effort: an unwritable audit file must not take the
//! ingest path down, so failures are traced and swallowed.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::json;

struct AuditInner {
    dir: PathBuf,
    current_date: Option<NaiveDate>,
    file: Option<File>,
}

/// Shared handle; clone freely.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<AuditInner>>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(AuditInner {
                dir,
                current_date: None,
                file: None,
            })),
        })
    }

    /// Append one event. `event` is one of the fixed audit event types;
    /// `details` is structured context (never plaintext or key material).
    pub fn record(&self, event: &str, details: serde_json::Value) {
        let now = Utc::now();
        let entry = json!({
            "timestamp": now.to_rfc3339(),
            "event": event,
            "details": details,
        });

        let mut inner = self.inner.lock();
        let today = now.date_naive();
        if inner.current_date != Some(today) || inner.file.is_none() {
            match Self::open_for(&inner.dir, today) {
                Ok(file) => {
                    inner.file = Some(file);
                    inner.current_date = Some(today);
                }
                Err(e) => {
                    tracing::error!(error = %e, event, "audit file open failed");
                    return;
                }
            }
        }
        if let Some(file) = inner.file.as_mut() {
            if let Err(e) = writeln!(file, "{entry}").and_then(|_| file.flush()) {
                tracing::error!(error = %e, event, "audit append failed");
            }
        }
    }

    fn open_for(dir: &PathBuf, date: NaiveDate) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("audit-{date}.log")))
    }
}
