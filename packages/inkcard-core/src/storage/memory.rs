/// In-process storage backend, used when embedding the engine without a
/// folder and throughout the engine tests.
///
/// Timestamps come from a logical clock that ticks on every mutation, so
/// ordering is deterministic.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{CardStorage, DocumentInfo, StorageError};

#[derive(Debug, Clone)]
struct MemoryDocument {
    text: String,
    created_ms: i64,
    modified_ms: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    docs: BTreeMap<String, MemoryDocument>,
    /// (id, text) of every successful `write_text`, in order.
    writes: Vec<(String, String)>,
    failing: bool,
    clock: i64,
}

impl MemoryState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn info(id: &str, doc: &MemoryDocument) -> DocumentInfo {
        DocumentInfo {
            id: id.to_string(),
            created_ms: doc.created_ms,
            modified_ms: doc.modified_ms,
        }
    }

    fn check_failing(&self, id: &str) -> Result<(), StorageError> {
        if self.failing {
            Err(StorageError::Io(std::io::Error::other(format!(
                "simulated failure for {}",
                id
            ))))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: &str, text: &str) -> Self {
        self.insert(id, text);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a document in place without recording a write.
    pub fn insert(&self, id: &str, text: &str) {
        let mut state = self.lock();
        let now = state.tick();
        let created_ms = state.docs.get(id).map_or(now, |d| d.created_ms);
        state.docs.insert(
            id.to_string(),
            MemoryDocument {
                text: text.to_string(),
                created_ms,
                modified_ms: now,
            },
        );
    }

    pub fn text(&self, id: &str) -> Option<String> {
        self.lock().docs.get(id).map(|d| d.text.clone())
    }

    pub fn write_log(&self) -> Vec<(String, String)> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Make every mutating call fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

#[async_trait]
impl CardStorage for MemoryStorage {
    async fn list_documents(&self) -> Result<Vec<DocumentInfo>, StorageError> {
        let state = self.lock();
        Ok(state
            .docs
            .iter()
            .map(|(id, doc)| MemoryState::info(id, doc))
            .collect())
    }

    async fn read_text(&self, id: &str) -> Result<String, StorageError> {
        self.lock()
            .docs
            .get(id)
            .map(|d| d.text.clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check_failing(id)?;
        let now = state.tick();
        let doc = state
            .docs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        doc.text = text.to_string();
        doc.modified_ms = now;
        state.writes.push((id.to_string(), text.to_string()));
        Ok(())
    }

    async fn create_text(&self, path: &str, text: &str) -> Result<DocumentInfo, StorageError> {
        let mut state = self.lock();
        state.check_failing(path)?;
        if state.docs.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        let now = state.tick();
        let doc = MemoryDocument {
            text: text.to_string(),
            created_ms: now,
            modified_ms: now,
        };
        let info = MemoryState::info(path, &doc);
        state.docs.insert(path.to_string(), doc);
        Ok(info)
    }

    async fn delete_text(&self, id: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check_failing(id)?;
        state
            .docs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.lock().docs.contains_key(path))
    }
}
