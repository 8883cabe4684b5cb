pub mod local;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

/// A document known to a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub id: String,
    pub created_ms: i64,
    pub modified_ms: i64,
}

/// Abstract storage for card documents.
/// Implementations: LocalStorage (filesystem), MemoryStorage (in-process).
#[async_trait]
pub trait CardStorage: Send + Sync {
    /// Every card document in the collection.
    async fn list_documents(&self) -> Result<Vec<DocumentInfo>, StorageError>;

    async fn read_text(&self, id: &str) -> Result<String, StorageError>;

    /// Replace the content of an existing document.
    async fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError>;

    /// Create a new document at `path`. Fails if it already exists.
    /// Returns the id of the new document.
    async fn create_text(&self, path: &str, text: &str) -> Result<DocumentInfo, StorageError>;

    async fn delete_text(&self, id: &str) -> Result<(), StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write rejected: {0}")]
    Rejected(String),
}
