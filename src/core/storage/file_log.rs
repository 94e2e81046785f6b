//! File-backed private log.
//!
//! One directory per agent: content-addressed entry files, an atomically
//! rewritten index, and an advisory lock file that makes a second writer
//! fail loudly instead of silently corrupting the chain.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    IndexEntry, LogEntry, LogIndex, PrivateLog, StorageError, StorageResult, STATE_ENTRY_ID,
};

const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = ".lock";

pub struct FileLog {
    dir: PathBuf,
    /// Serializes index rewrites; held only across an append.
    index_guard: Mutex<()>,
}

impl FileLog {
    /// Open (creating if needed) the log directory and take the
    /// single-writer lock.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let lock_path = dir.join(LOCK_FILE);
        // create_new is the advisory lock: it fails if another writer
        // already holds the directory.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut f) => {
                use std::io::Write;
                let _ = writeln!(f, "{}", std::process::id());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::Locked(lock_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        info!("[FileLog] opened {}", dir.display());
        Ok(FileLog {
            dir,
            index_guard: Mutex::new(()),
        })
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash))
    }

    async fn read_index(&self) -> StorageResult<LogIndex> {
        let path = self.dir.join(INDEX_FILE);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Corrupt(format!("index: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LogIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Temp-file-plus-rename so a crash mid-save leaves the old bytes
    /// fully visible.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl Drop for FileLog {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.dir.join(LOCK_FILE));
    }
}

#[async_trait]
impl PrivateLog for FileLog {
    async fn append(&self, entry: &LogEntry) -> StorageResult<String> {
        let hash = entry.content_hash()?;
        let bytes = serde_json::to_vec_pretty(entry)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.write_atomic(&self.entry_path(&hash), &bytes).await?;

        let _guard = self.index_guard.lock().await;
        let mut index = self.read_index().await?;
        if let Some(existing) = index
            .entries
            .iter_mut()
            .find(|e| e.interaction_id == entry.interaction_id)
        {
            // Same id overwrites at the index level; the prior content
            // file stays untouched on disk.
            debug!("[FileLog] replacing index slot for '{}'", entry.interaction_id);
            existing.hash = hash.clone();
            existing.sequence = entry.sequence;
        } else {
            index.entries.push(IndexEntry {
                interaction_id: entry.interaction_id.clone(),
                hash: hash.clone(),
                sequence: entry.sequence,
            });
            index.total += 1;
        }
        let index_bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.write_atomic(&self.dir.join(INDEX_FILE), &index_bytes)
            .await?;
        Ok(hash)
    }

    async fn read(&self, hash: &str) -> StorageResult<LogEntry> {
        let path = self.entry_path(hash);
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(hash.to_string())
            } else {
                e.into()
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", hash, e)))
    }

    async fn index(&self) -> StorageResult<LogIndex> {
        self.read_index().await
    }

    async fn load_state(&self) -> StorageResult<Option<serde_json::Value>> {
        let index = self.read_index().await?;
        let Some(slot) = index.find(STATE_ENTRY_ID) else {
            return Ok(None);
        };
        let entry = self.read(&slot.hash).await?;
        Ok(Some(entry.metadata))
    }
}

/// Build the reserved state entry around a serialized blob.
pub fn state_entry(sequence: u64, state_json: serde_json::Value) -> LogEntry {
    LogEntry {
        interaction_id: STATE_ENTRY_ID.to_string(),
        sequence,
        interaction: None,
        insights: Vec::new(),
        metadata: state_json,
        timestamp: Utc::now().timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::InteractionRecord;

    fn entry(id: &str, seq: u64) -> LogEntry {
        LogEntry {
            interaction_id: id.to_string(),
            sequence: seq,
            interaction: Some(InteractionRecord::new(id)),
            insights: vec![],
            metadata: serde_json::json!({"seq": seq}),
            timestamp: 1700000000,
        }
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let log = FileLog::open(tmp.path()).await.unwrap();
        let hash = log.append(&entry("s1", 1)).await.unwrap();
        let back = log.read(&hash).await.unwrap();
        assert_eq!(back.interaction_id, "s1");
        let index = log.index().await.unwrap();
        assert_eq!(index.total, 1);
        assert_eq!(index.entries[0].hash, hash);
    }

    #[tokio::test]
    async fn repeated_id_overwrites_index_but_keeps_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let log = FileLog::open(tmp.path()).await.unwrap();
        let h1 = log.append(&entry("s1", 1)).await.unwrap();
        let h2 = log.append(&entry("s1", 2)).await.unwrap();
        assert_ne!(h1, h2);
        let index = log.index().await.unwrap();
        assert_eq!(index.total, 1);
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].hash, h2);
        // prior content bytes are still readable
        assert!(log.read(&h1).await.is_ok());
    }

    #[tokio::test]
    async fn second_writer_fails_loudly() {
        let tmp = tempfile::tempdir().unwrap();
        let _first = FileLog::open(tmp.path()).await.unwrap();
        let second = FileLog::open(tmp.path()).await;
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[tokio::test]
    async fn lock_is_released_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let _log = FileLog::open(tmp.path()).await.unwrap();
        }
        assert!(FileLog::open(tmp.path()).await.is_ok());
    }

    #[tokio::test]
    async fn state_slot_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let log = FileLog::open(tmp.path()).await.unwrap();
        assert!(log.load_state().await.unwrap().is_none());
        log.append(&state_entry(1, serde_json::json!({"weights": [0.5]})))
            .await
            .unwrap();
        let state = log.load_state().await.unwrap().unwrap();
        assert_eq!(state["weights"][0], 0.5);
    }

    #[tokio::test]
    async fn missing_hash_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let log = FileLog::open(tmp.path()).await.unwrap();
        assert!(matches!(
            log.read("deadbeef").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
