/// File watcher using notify-debouncer-full.
///
/// Watches the collection folder recursively and emits CardChangeEvent via a
/// broadcast channel. 500ms debounce window for cloud sync stability.
/// Events are not filtered for self-writes here; receivers check them
/// against `LocalStorage::check_self_write`.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use tokio::sync::broadcast;

use super::types::CardChangeEvent;
use crate::storage::local::id_for_path;

const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    root: PathBuf,
    event_tx: broadcast::Sender<CardChangeEvent>,
}

impl FileWatcher {
    /// Start watching `root`. Returns the watcher and a receiver for events.
    pub fn new(root: &Path) -> Result<(Self, broadcast::Receiver<CardChangeEvent>), notify::Error> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let (event_tx, event_rx) = broadcast::channel(256);

        let tx_clone = event_tx.clone();
        let root_clone = root.clone();
        let mut debouncer = new_debouncer(
            DEBOUNCE_DURATION,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => dispatch_events(&root_clone, &events, &tx_clone),
                Err(errors) => {
                    for e in errors {
                        log::error!("[inkcard.watcher.error] Watch error: {}", e);
                    }
                }
            },
        )?;
        debouncer.watch(&root, RecursiveMode::Recursive)?;
        log::info!("[inkcard.watcher] Watching {:?}", root);

        Ok((
            Self {
                _debouncer: debouncer,
                root,
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CardChangeEvent> {
        self.event_tx.subscribe()
    }
}

fn dispatch_events(root: &Path, events: &[DebouncedEvent], tx: &broadcast::Sender<CardChangeEvent>) {
    let mut sent = HashSet::new();
    for event in events {
        for path in &event.paths {
            let Some(change) = change_event(root, &event.kind, path, path.exists()) else {
                continue;
            };
            if !sent.insert(change.clone()) {
                continue;
            }
            log::debug!("[inkcard.watcher.event] {:?}", change);
            if let Err(e) = tx.send(change) {
                log::warn!("[inkcard.watcher.send] No receivers: {}", e);
            }
        }
    }
}

/// Map a raw event on `path` to a card event. Paths outside the root and
/// non-card files are ignored.
fn change_event(root: &Path, kind: &EventKind, path: &Path, exists: bool) -> Option<CardChangeEvent> {
    let id = id_for_path(root, path)?;
    if id.split('/').any(|part| part.starts_with('.')) {
        return None;
    }
    match kind {
        EventKind::Create(_) => Some(CardChangeEvent::Created { id }),
        EventKind::Remove(_) => Some(CardChangeEvent::Deleted { id }),
        EventKind::Modify(_) | EventKind::Any if exists => Some(CardChangeEvent::Changed { id }),
        EventKind::Modify(_) | EventKind::Any => Some(CardChangeEvent::Deleted { id }),
        _ => None,
    }
}
