//! Rolling, capped log of non-fatal failures.
//!
//! Kept under the `app-errors` key so it survives restarts. When the log is
//! full the oldest entries are dropped first.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::kv::{keys, read_json, write_json, KvStore, Stored};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppErrorEntry {
    pub at: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

#[derive(Clone)]
pub struct ErrorLog {
    kv: Arc<dyn KvStore>,
    cap: usize,
    // serializes read-modify-write cycles between clones
    write_lock: Arc<Mutex<()>>,
}

impl ErrorLog {
    pub const DEFAULT_CAP: usize = 50;

    pub fn new(kv: Arc<dyn KvStore>, cap: usize) -> Self {
        Self {
            kv,
            cap: cap.max(1),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// All entries, oldest first. A corrupted log reads as empty.
    pub fn entries(&self) -> Result<Vec<AppErrorEntry>> {
        match read_json::<Vec<AppErrorEntry>>(self.kv.as_ref(), keys::APP_ERRORS)? {
            Stored::Value(entries) => Ok(entries),
            Stored::Missing => Ok(Vec::new()),
            Stored::Corrupt(e) => {
                tracing::warn!(error = %e, "error log is corrupted, starting over");
                Ok(Vec::new())
            }
        }
    }

    pub fn push(&self, source: &str, message: impl Into<String>) -> Result<()> {
        let entry = AppErrorEntry {
            at: Utc::now(),
            source: source.to_string(),
            message: message.into(),
        };
        tracing::debug!(source, message = %entry.message, "recording app error");

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries = self.entries()?;
        entries.push(entry);
        if entries.len() > self.cap {
            let excess = entries.len() - self.cap;
            entries.drain(..excess);
        }
        write_json(self.kv.as_ref(), keys::APP_ERRORS, &entries)
    }

    /// Same as [`ErrorLog::push`], but a failure to write is only logged.
    pub fn note(&self, source: &str, message: impl Into<String>) {
        if let Err(e) = self.push(source, message) {
            tracing::warn!(error = %e, "could not write to error log");
        }
    }

    /// Entries newer than `window`.
    pub fn recent(&self, window: Duration) -> Result<Vec<AppErrorEntry>> {
        let cutoff = Utc::now() - window;
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.at >= cutoff)
            .collect())
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.kv.remove(keys::APP_ERRORS)
    }
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLog").field("cap", &self.cap).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    #[test]
    fn drops_oldest_past_cap() {
        let log = ErrorLog::new(Arc::new(MemoryKv::new()), 3);
        for i in 0..5 {
            log.push("test", format!("error {i}")).unwrap();
        }
        let messages: Vec<_> = log.entries().unwrap().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["error 2", "error 3", "error 4"]);
    }

    #[test]
    fn corrupted_log_reads_empty_and_recovers_on_push() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(keys::APP_ERRORS, "[{\"at\":").unwrap();
        let log = ErrorLog::new(kv, 10);
        assert!(log.entries().unwrap().is_empty());
        log.push("sync", "offline").unwrap();
        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn recent_filters_by_age() {
        let kv = Arc::new(MemoryKv::new());
        let old = AppErrorEntry {
            at: Utc::now() - Duration::hours(2),
            source: "sync".into(),
            message: "old".into(),
        };
        write_json(kv.as_ref(), keys::APP_ERRORS, &vec![old]).unwrap();
        let log = ErrorLog::new(kv, 10);
        log.push("sync", "new").unwrap();
        let recent = log.recent(Duration::minutes(5)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "new");
    }

    #[test]
    fn clear_empties_log() {
        let log = ErrorLog::new(Arc::new(MemoryKv::new()), 10);
        log.push("x", "y").unwrap();
        log.clear().unwrap();
        assert!(log.entries().unwrap().is_empty());
    }
}
