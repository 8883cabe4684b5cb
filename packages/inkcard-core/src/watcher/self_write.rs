/// Recognizes watcher events caused by our own card writes.
///
/// A card save is a tmp write plus a rename onto `<card>.md`, which the
/// watcher reports as a create or modify of the card itself. Storage
/// registers the text it is about to write; when the event arrives, the
/// card file is fingerprinted and a matching entry is consumed. Anything
/// else is an external edit and goes to `reload_card`. Deleting a card
/// drops its entries so a file recreated with the same text is seen.
/// The TTL only bounds memory.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::types::ContentFingerprint;

const FINGERPRINT_TTL: Duration = Duration::from_secs(10);

struct PendingWrite {
    fingerprint: ContentFingerprint,
    registered_at: Instant,
}

#[derive(Default)]
pub struct SelfWriteTracker {
    /// Several writes can land before the watcher fires.
    pending: HashMap<PathBuf, Vec<PendingWrite>>,
}

impl SelfWriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: &Path, content: &str) {
        self.pending
            .entry(path.to_path_buf())
            .or_default()
            .push(PendingWrite {
                fingerprint: ContentFingerprint::from_content(content),
                registered_at: Instant::now(),
            });
    }

    /// True, consuming the entry, when `current_content` is one of our writes.
    pub fn check_and_consume(&mut self, path: &Path, current_content: &str) -> bool {
        let fingerprint = ContentFingerprint::from_content(current_content);
        let Some(entries) = self.pending.get_mut(path) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.fingerprint == fingerprint) else {
            return false;
        };
        entries.remove(pos);
        if entries.is_empty() {
            self.pending.remove(path);
        }
        true
    }

    pub fn cleanup_expired(&mut self) {
        let now = Instant::now();
        self.pending.retain(|_, entries| {
            entries.retain(|e| now.duration_since(e.registered_at) < FINGERPRINT_TTL);
            !entries.is_empty()
        });
    }

    /// Drop everything pending for a card that no longer exists.
    pub fn forget(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    pub fn has_pending(&self, path: &Path) -> bool {
        self.pending.get(path).is_some_and(|e| !e.is_empty())
    }
}
