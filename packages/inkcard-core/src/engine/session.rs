/// Per-card autosave state.
///
/// A session owns the live draft of one card and the serialized write chain
/// that persists it. The chain is a fair async mutex guarding the committed
/// baseline: every write for the card, content or structural, runs while
/// holding it, so writes reach storage in the order they queued.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::codec;
use crate::tokens;
use crate::types::Card;

/// What the editing surface currently shows for a card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftState {
    pub body: String,
    pub tags_line: String,
    pub images: Vec<String>,
    pub tag_editor_focused: bool,
}

#[derive(Debug)]
struct Draft {
    state: DraftState,
    /// Bumped on every user edit.
    edit_gen: u64,
    /// Highest edit generation known to be persisted.
    saved_gen: u64,
}

/// Draft fields captured for one write.
#[derive(Debug, Clone)]
pub(crate) struct DraftSnapshot {
    pub body: String,
    pub tags_line: String,
    pub images: Vec<String>,
    pub generation: u64,
}

/// Last confirmed document state. Guarded by the write chain.
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub frontmatter: Option<String>,
    pub metadata_body: Option<String>,
    pub body: String,
    /// Exact text of the last confirmed write (or of the loaded document).
    pub last_saved: String,
}

impl Committed {
    pub fn from_card(card: &Card) -> Self {
        let content = &card.content;
        Self {
            frontmatter: content.frontmatter.clone(),
            metadata_body: content.metadata_body.clone(),
            body: content.body.clone(),
            last_saved: codec::compose_content(
                content.frontmatter.as_deref(),
                content.metadata_body.as_deref(),
                &content.body,
            ),
        }
    }
}

#[derive(Debug, Default)]
struct DebounceSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub(crate) struct CardSession {
    draft: Mutex<Draft>,
    pub chain: tokio::sync::Mutex<Committed>,
    request_seq: AtomicU64,
    debounce: Mutex<DebounceSlot>,
    deleted: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CardSession {
    pub fn from_card(card: &Card) -> Self {
        Self {
            draft: Mutex::new(Draft {
                state: DraftState {
                    body: card.content.body.clone(),
                    tags_line: card.content.tags_line.clone(),
                    images: card.content.images.clone(),
                    tag_editor_focused: false,
                },
                edit_gen: 0,
                saved_gen: 0,
            }),
            chain: tokio::sync::Mutex::new(Committed::from_card(card)),
            request_seq: AtomicU64::new(0),
            debounce: Mutex::new(DebounceSlot::default()),
            deleted: AtomicBool::new(false),
        }
    }

    // ---- draft ----

    pub fn draft_state(&self) -> DraftState {
        lock(&self.draft).state.clone()
    }

    /// Apply a user edit to the draft.
    pub fn edit(&self, f: impl FnOnce(&mut DraftState)) {
        let mut draft = lock(&self.draft);
        f(&mut draft.state);
        draft.edit_gen += 1;
    }

    /// Fallible edit; the generation only moves when `f` returns `Ok`.
    pub fn try_edit<E>(&self, f: impl FnOnce(&mut DraftState) -> Result<(), E>) -> Result<(), E> {
        let mut draft = lock(&self.draft);
        f(&mut draft.state)?;
        draft.edit_gen += 1;
        Ok(())
    }

    pub fn set_tag_editor_focused(&self, focused: bool) {
        lock(&self.draft).state.tag_editor_focused = focused;
    }

    /// Capture the draft for a write. The tag line is normalized in place
    /// unless the tag editor has focus.
    pub fn snapshot_for_save(&self) -> DraftSnapshot {
        let mut draft = lock(&self.draft);
        if !draft.state.tag_editor_focused {
            draft.state.tags_line = tokens::normalize_tag_line(&draft.state.tags_line);
        }
        DraftSnapshot {
            body: draft.state.body.clone(),
            tags_line: draft.state.tags_line.clone(),
            images: draft.state.images.clone(),
            generation: draft.edit_gen,
        }
    }

    pub fn mark_saved(&self, generation: u64) {
        let mut draft = lock(&self.draft);
        draft.saved_gen = draft.saved_gen.max(generation);
    }

    pub fn is_dirty(&self) -> bool {
        let draft = lock(&self.draft);
        draft.edit_gen != draft.saved_gen
    }

    /// Replace draft and baseline with an externally changed card, unless
    /// the draft has edits not yet saved. Caller holds the chain.
    pub fn reset_if_clean(&self, committed: &mut Committed, card: &Card) -> bool {
        let mut draft = lock(&self.draft);
        if draft.edit_gen != draft.saved_gen {
            return false;
        }
        *committed = Committed::from_card(card);
        let focused = draft.state.tag_editor_focused;
        draft.state = DraftState {
            body: card.content.body.clone(),
            tags_line: card.content.tags_line.clone(),
            images: card.content.images.clone(),
            tag_editor_focused: focused,
        };
        true
    }

    // ---- request ids ----

    pub fn next_request(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current_request(&self, request_id: u64) -> bool {
        self.request_seq.load(Ordering::SeqCst) == request_id
    }

    // ---- debounce ----

    /// Replace any pending timer with the one `spawn` starts. `spawn`
    /// receives the generation the timer must claim.
    pub fn arm_debounce(&self, spawn: impl FnOnce(u64) -> JoinHandle<()>) {
        let mut slot = lock(&self.debounce);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        slot.handle = Some(spawn(generation));
    }

    /// Called by an expiring timer. False when a newer edit re-armed or the
    /// timer was cancelled.
    pub fn claim_debounce(&self, generation: u64) -> bool {
        let mut slot = lock(&self.debounce);
        if slot.generation != generation {
            return false;
        }
        slot.handle = None;
        true
    }

    pub fn cancel_debounce(&self) -> bool {
        let mut slot = lock(&self.debounce);
        slot.generation += 1;
        match slot.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_pending_debounce(&self) -> bool {
        lock(&self.debounce)
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // ---- lifecycle ----

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }
}
