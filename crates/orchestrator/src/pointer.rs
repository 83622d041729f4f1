//! Durable trailer resumption pointer.
//!
//! Trailer jobs are the slowest and most failure-prone, so the single
//! in-flight trailer survives a full reload as one persisted record. The
//! store is a pluggable one-record slot; anything beyond the fixed expiry
//! is discarded unconditionally regardless of the job's real state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The one durable record: enough to re-attach a poller after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailerPointer {
    pub job_id: String,
    pub show_id: String,
    pub started_at: DateTime<Utc>,
}

impl TrailerPointer {
    pub fn new(job_id: String, show_id: String) -> Self {
        Self {
            job_id,
            show_id,
            started_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.started_at);
        age > chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX)
    }
}

/// One key/value slot for the trailer pointer.
pub trait PointerStore: Send + Sync {
    fn get(&self) -> Result<Option<TrailerPointer>>;
    fn set(&self, pointer: &TrailerPointer) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON-file-backed pointer store.
pub struct FilePointerStore {
    path: PathBuf,
}

impl FilePointerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PointerStore for FilePointerStore {
    fn get(&self) -> Result<Option<TrailerPointer>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read trailer pointer at {:?}", self.path))?;
        let pointer = serde_json::from_str(&json).context("parse trailer pointer")?;
        Ok(Some(pointer))
    }

    fn set(&self, pointer: &TrailerPointer) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(pointer)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("write trailer pointer at {:?}", self.path))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-memory pointer store, for embedding and tests.
#[derive(Default)]
pub struct MemoryPointerStore {
    slot: Mutex<Option<TrailerPointer>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerStore for MemoryPointerStore {
    fn get(&self) -> Result<Option<TrailerPointer>> {
        Ok(self.slot.lock().clone())
    }

    fn set(&self, pointer: &TrailerPointer) -> Result<()> {
        *self.slot.lock() = Some(pointer.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("trailer-pointer-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_store_roundtrip_and_clear() {
        let path = temp_path();
        let store = FilePointerStore::new(&path);
        assert!(store.get().unwrap().is_none());

        let pointer = TrailerPointer::new("job-77".to_string(), "show-1".to_string());
        store.set(&pointer).unwrap();
        assert_eq!(store.get().unwrap(), Some(pointer));

        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
        // Clearing an empty slot is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_expiry() {
        let fresh = TrailerPointer::new("job-1".to_string(), "show-1".to_string());
        assert!(!fresh.is_expired(Duration::from_secs(600)));

        let stale = TrailerPointer {
            job_id: "job-2".to_string(),
            show_id: "show-1".to_string(),
            started_at: Utc::now() - chrono::Duration::minutes(11),
        };
        assert!(stale.is_expired(Duration::from_secs(600)));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryPointerStore::new();
        let pointer = TrailerPointer::new("job-1".to_string(), "show-1".to_string());
        store.set(&pointer).unwrap();
        assert_eq!(store.get().unwrap(), Some(pointer));
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }
}
