//! Private append-only log.
//!
//! Each entry is content-addressed (SHA-256 of its canonical JSON) and
//! tracked by a monotone index. One reserved id carries the serialized
//! sidecar state; writing it again replaces the index slot but leaves
//! prior content bytes alone.

pub mod consolidate;
pub mod file_log;
pub mod state;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::observer::InteractionRecord;
use crate::intel::Insight;

/// Reserved interaction id for the serialized sidecar state.
pub const STATE_ENTRY_ID: &str = "aril_state";

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage directory is locked by another writer: {0}")]
    Locked(String),

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization: {0}")]
    Serialization(String),
}

/// One log entry: a session's record, its insights, and free metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub interaction_id: String,
    pub sequence: u64,
    pub interaction: Option<InteractionRecord>,
    pub insights: Vec<Insight>,
    pub metadata: serde_json::Value,
    pub timestamp: i64,
}

impl LogEntry {
    /// Content address: SHA-256 hex of the canonical JSON.
    pub fn content_hash(&self) -> StorageResult<String> {
        use sha2::{Digest, Sha256};
        let json =
            serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub interaction_id: String,
    pub hash: String,
    pub sequence: u64,
}

/// The index file: counts plus the hash list, rewritten atomically on
/// every append.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogIndex {
    pub total: u64,
    pub entries: Vec<IndexEntry>,
}

impl LogIndex {
    pub fn find(&self, interaction_id: &str) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .find(|e| e.interaction_id == interaction_id)
    }
}

/// Storage backend contract. The in-memory identity is unchanged when
/// any of these fail — retries are the caller's call.
#[async_trait]
pub trait PrivateLog: Send + Sync {
    /// Append an entry (or overwrite its index slot for a repeated id);
    /// returns the content hash.
    async fn append(&self, entry: &LogEntry) -> StorageResult<String>;

    /// Read an entry back by content hash.
    async fn read(&self, hash: &str) -> StorageResult<LogEntry>;

    /// Current index.
    async fn index(&self) -> StorageResult<LogIndex>;

    /// Load the reserved state entry, if any.
    async fn load_state(&self) -> StorageResult<Option<serde_json::Value>>;
}
