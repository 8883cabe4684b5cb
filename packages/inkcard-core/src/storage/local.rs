/// Local filesystem storage backend.
///
/// Manages card documents in one folder with:
/// - `/`-separated ids relative to the folder
/// - Recursive `.md` listing, hidden directories skipped
/// - Atomic writes (write to .tmp, fsync, rename, fsync directory)
/// - Self-write fingerprints for the file watcher
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;

use super::{CardStorage, DocumentInfo, StorageError};
use crate::watcher::self_write::SelfWriteTracker;

const CARD_EXTENSION: &str = "md";

/// Card documents under a single root folder.
pub struct LocalStorage {
    root: PathBuf,
    /// SHA-256 fingerprint tracker for self-write detection
    self_write_tracker: Arc<Mutex<SelfWriteTracker>>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            self_write_tracker: Arc::new(Mutex::new(SelfWriteTracker::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a document id. Absolute ids and ids that step
    /// outside the root are rejected.
    pub fn path_for_id(&self, id: &str) -> Result<PathBuf, StorageError> {
        resolve_id(&self.root, id)
    }

    /// Document id for a path under the root, if it names a card document.
    pub fn id_for_path(&self, path: &Path) -> Option<String> {
        id_for_path(&self.root, path)
    }

    /// Check if a file change at `path` is a self-write by comparing content fingerprint.
    /// If matched, the fingerprint is consumed and true is returned (suppress event).
    pub fn check_self_write(&self, path: &Path) -> bool {
        match fs::read_to_string(path) {
            Ok(content) => self
                .self_write_tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check_and_consume(path, &content),
            Err(_) => false,
        }
    }

    /// Run periodic cleanup of expired fingerprints.
    pub fn cleanup_expired_fingerprints(&self) {
        self.self_write_tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cleanup_expired();
    }

    fn register_self_write(tracker: &Mutex<SelfWriteTracker>, path: &Path, content: &str) {
        tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(path, content);
    }

    /// Atomic write with fsync: write to .tmp, fsync, rename, fsync directory.
    /// Refuses to write empty content over a non-empty file.
    fn atomic_write(path: &Path, content: &str) -> Result<(), StorageError> {
        if content.trim().is_empty() {
            if let Ok(existing) = fs::read_to_string(path) {
                if !existing.trim().is_empty() {
                    return Err(StorageError::Rejected(
                        "refusing to overwrite non-empty document with empty content".to_string(),
                    ));
                }
            }
        }

        let tmp_path = path.with_extension("inkcard.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        if let Some(dir) = path.parent() {
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }
}

fn resolve_id(root: &Path, id: &str) -> Result<PathBuf, StorageError> {
    let rel = Path::new(id);
    let well_formed = !id.trim().is_empty()
        && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !well_formed {
        return Err(StorageError::InvalidPath(id.to_string()));
    }
    Ok(root.join(rel))
}

pub(crate) fn id_for_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.extension().and_then(|e| e.to_str()) != Some(CARD_EXTENSION) {
        return None;
    }
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

fn millis(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn document_info(root: &Path, path: &Path) -> Result<DocumentInfo, StorageError> {
    let id = id_for_path(root, path)
        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
    let meta = fs::metadata(path)?;
    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
    let created = meta.created().unwrap_or(modified);
    Ok(DocumentInfo {
        id,
        created_ms: millis(created),
        modified_ms: millis(modified),
    })
}

fn collect_documents(root: &Path, dir: &Path, out: &mut Vec<DocumentInfo>) -> Result<(), StorageError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if !hidden {
                collect_documents(root, &path, out)?;
            }
            continue;
        }
        if !file_type.is_file() || id_for_path(root, &path).is_none() {
            continue;
        }
        match document_info(root, &path) {
            Ok(info) => out.push(info),
            Err(e) => log::warn!("[inkcard.storage.local] Skipping {:?}: {}", path, e),
        }
    }
    Ok(())
}

fn not_found_as(id: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(id.to_string())
    } else {
        StorageError::Io(err)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl CardStorage for LocalStorage {
    async fn list_documents(&self) -> Result<Vec<DocumentInfo>, StorageError> {
        let root = self.root.clone();
        blocking(move || {
            let mut docs = Vec::new();
            collect_documents(&root, &root, &mut docs)?;
            docs.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(docs)
        })
        .await
    }

    async fn read_text(&self, id: &str) -> Result<String, StorageError> {
        let path = self.path_for_id(id)?;
        let id = id.to_string();
        blocking(move || fs::read_to_string(&path).map_err(|e| not_found_as(&id, e))).await
    }

    async fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError> {
        let path = self.path_for_id(id)?;
        let id = id.to_string();
        let text = text.to_string();
        let tracker = Arc::clone(&self.self_write_tracker);
        blocking(move || {
            if !path.is_file() {
                return Err(StorageError::NotFound(id));
            }
            Self::register_self_write(&tracker, &path, &text);
            Self::atomic_write(&path, &text)?;
            log::debug!("[inkcard.storage.local] Wrote {} ({} bytes)", id, text.len());
            Ok(())
        })
        .await
    }

    async fn create_text(&self, path: &str, text: &str) -> Result<DocumentInfo, StorageError> {
        let full = self.path_for_id(path)?;
        let root = self.root.clone();
        let id = path.to_string();
        let text = text.to_string();
        let tracker = Arc::clone(&self.self_write_tracker);
        blocking(move || {
            if full.exists() {
                return Err(StorageError::AlreadyExists(id));
            }
            if let Some(dir) = full.parent() {
                fs::create_dir_all(dir)?;
            }
            Self::register_self_write(&tracker, &full, &text);
            Self::atomic_write(&full, &text)?;
            log::info!("[inkcard.storage.local] Created {}", id);
            document_info(&root, &full)
        })
        .await
    }

    async fn delete_text(&self, id: &str) -> Result<(), StorageError> {
        let path = self.path_for_id(id)?;
        let id = id.to_string();
        let tracker = Arc::clone(&self.self_write_tracker);
        blocking(move || {
            fs::remove_file(&path).map_err(|e| not_found_as(&id, e))?;
            tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .forget(&path);
            log::info!("[inkcard.storage.local] Deleted {}", id);
            Ok(())
        })
        .await
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.path_for_id(path)?;
        blocking(move || Ok(full.exists())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage_with(files: &[(&str, &str)]) -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_list_only_markdown_skipping_hidden() {
        let (_dir, storage) = storage_with(&[
            ("a.md", "a"),
            ("sub/b.md", "b"),
            ("notes.txt", "x"),
            (".trash/c.md", "c"),
        ]);
        let ids: Vec<String> = storage
            .list_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a.md", "sub/b.md"]);
    }

    #[tokio::test]
    async fn test_read_write_round_trip() {
        let (_dir, storage) = storage_with(&[("a.md", "old")]);
        storage.write_text("a.md", "new").await.unwrap();
        assert_eq!(storage.read_text("a.md").await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_write_missing_is_not_found() {
        let (_dir, storage) = storage_with(&[]);
        let err = storage.write_text("ghost.md", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        let err = storage.read_text("ghost.md").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_refuses_empty_over_content() {
        let (_dir, storage) = storage_with(&[("a.md", "keep me")]);
        let err = storage.write_text("a.md", "  \n").await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
        assert_eq!(storage.read_text("a.md").await.unwrap(), "keep me");
    }

    #[tokio::test]
    async fn test_rejects_escaping_ids() {
        let (_dir, storage) = storage_with(&[]);
        assert!(matches!(
            storage.read_text("../etc/passwd").await.unwrap_err(),
            StorageError::InvalidPath(_)
        ));
        assert!(matches!(
            storage.read_text("/abs.md").await.unwrap_err(),
            StorageError::InvalidPath(_)
        ));
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let (_dir, storage) = storage_with(&[]);
        let info = storage.create_text("inbox/new.md", "hello").await.unwrap();
        assert_eq!(info.id, "inbox/new.md");
        assert!(storage.exists("inbox/new.md").await.unwrap());
        assert!(matches!(
            storage.create_text("inbox/new.md", "again").await.unwrap_err(),
            StorageError::AlreadyExists(_)
        ));
        storage.delete_text("inbox/new.md").await.unwrap();
        assert!(!storage.exists("inbox/new.md").await.unwrap());
        assert!(matches!(
            storage.delete_text("inbox/new.md").await.unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_own_writes_are_recognized() {
        let (_dir, storage) = storage_with(&[("a.md", "old")]);
        storage.write_text("a.md", "mine").await.unwrap();
        let path = storage.path_for_id("a.md").unwrap();
        assert!(storage.check_self_write(&path));
        // Fingerprint is consumed on match.
        assert!(!storage.check_self_write(&path));

        fs::write(&path, "external").unwrap();
        assert!(!storage.check_self_write(&path));
    }

    #[tokio::test]
    async fn test_delete_clears_pending_self_writes() {
        let (_dir, storage) = storage_with(&[("a.md", "old")]);
        storage.write_text("a.md", "mine").await.unwrap();
        storage.delete_text("a.md").await.unwrap();

        let path = storage.path_for_id("a.md").unwrap();
        fs::write(&path, "mine").unwrap();
        assert!(!storage.check_self_write(&path));
    }

    #[test]
    fn test_id_for_path() {
        let root = Path::new("/notes");
        assert_eq!(id_for_path(root, Path::new("/notes/a/b.md")).as_deref(), Some("a/b.md"));
        assert_eq!(id_for_path(root, Path::new("/notes/a/b.txt")), None);
        assert_eq!(id_for_path(root, Path::new("/elsewhere/b.md")), None);
    }
}
