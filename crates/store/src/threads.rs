//! Thread registry.
//!
//! Persists thread records in `threads.json` under the configured data
//! path, with an in-memory write-through cache so lookups never hit disk
//! after the first load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use tl_domain::error::{Error, Result};
use tl_domain::message::ThreadRecord;
use tl_domain::trace::TraceEvent;

pub struct ThreadStore {
    threads_path: PathBuf,
    threads: RwLock<HashMap<String, ThreadRecord>>,
}

impl ThreadStore {
    /// Load or create the thread registry at `data_path/threads.json`.
    pub fn new(data_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_path).map_err(Error::Io)?;

        let threads_path = data_path.join("threads.json");
        let threads: HashMap<String, ThreadRecord> = if threads_path.exists() {
            let raw = std::fs::read_to_string(&threads_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            threads = threads.len(),
            path = %threads_path.display(),
            "thread store loaded"
        );

        Ok(Self {
            threads_path,
            threads: RwLock::new(threads),
        })
    }

    /// Create a new thread and persist it immediately.
    pub fn create_thread(
        &self,
        account_id: Option<String>,
        project_id: Option<String>,
        is_public: bool,
        metadata: serde_json::Value,
    ) -> Result<ThreadRecord> {
        let record = ThreadRecord {
            thread_id: uuid::Uuid::new_v4().to_string(),
            account_id,
            project_id,
            is_public,
            metadata,
            created_at: Utc::now(),
        };

        {
            let mut threads = self.threads.write();
            threads.insert(record.thread_id.clone(), record.clone());
        }
        self.flush()?;

        TraceEvent::ThreadCreated {
            thread_id: record.thread_id.clone(),
        }
        .emit();
        Ok(record)
    }

    pub fn get_thread(&self, thread_id: &str) -> Option<ThreadRecord> {
        self.threads.read().get(thread_id).cloned()
    }

    /// Replace a thread's metadata and persist.
    pub fn update_metadata(&self, thread_id: &str, metadata: serde_json::Value) -> Result<()> {
        {
            let mut threads = self.threads.write();
            let record = threads.get_mut(thread_id).ok_or_else(|| {
                Error::Persistence(format!("unknown thread {thread_id}"))
            })?;
            record.metadata = metadata;
        }
        self.flush()
    }

    /// Persist the current registry to disk.
    pub fn flush(&self) -> Result<()> {
        let threads = self.threads.read();
        let json = serde_json::to_string_pretty(&*threads)
            .map_err(|e| Error::Persistence(format!("serializing threads: {e}")))?;
        std::fs::write(&self.threads_path, json)
            .map_err(|e| Error::Persistence(format!("writing threads.json: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let thread_id = {
            let store = ThreadStore::new(dir.path()).unwrap();
            let record = store
                .create_thread(
                    Some("acct-1".into()),
                    None,
                    false,
                    serde_json::json!({"title": "test"}),
                )
                .unwrap();
            record.thread_id
        };

        let store = ThreadStore::new(dir.path()).unwrap();
        let record = store.get_thread(&thread_id).unwrap();
        assert_eq!(record.account_id.as_deref(), Some("acct-1"));
        assert_eq!(record.metadata["title"], "test");
    }

    #[test]
    fn update_metadata_unknown_thread_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path()).unwrap();
        let err = store
            .update_metadata("nope", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
