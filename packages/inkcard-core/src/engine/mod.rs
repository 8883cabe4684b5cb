/// Autosave engine: keeps a collection of cards in a [`CardStore`] and
/// persists edits to them through a [`CardStorage`].
///
/// Per card, edits are debounced and every write goes through one
/// serialized chain. See `autosave.rs` for the write paths.
mod autosave;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::codec;
use crate::config::CollectionConfig;
use crate::geometry::{self, GeometryMemory, PanelDefaults, Viewport};
use crate::metadata::{self, FloatingChange, MetadataPatch};
use crate::notice::{Notice, Notifier};
use crate::query::SortMode;
use crate::storage::{CardStorage, StorageError};
use crate::store::CardStore;
use crate::types::{now_millis, Card, FloatingGeometry, CARD_COLORS};

pub use session::DraftState;
use session::CardSession;

/// How many `-N` suffixes to try before falling back to a timestamp.
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Cannot pin {requested}: {pinned} is already pinned")]
    PinConflict { requested: String, pinned: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of one pass through the write chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The document was written.
    Written,
    /// Composed text equals the last confirmed write; nothing was sent.
    Unchanged,
    /// A newer save was queued behind this one, or the card is gone.
    Superseded,
    /// Storage refused the write. Reported through the notifier; the draft
    /// is kept and the next save retries.
    Failed,
}

/// A user edit to one debounced field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Body(String),
    TagsLine(String),
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub debounce: Duration,
    pub palette: Vec<String>,
    pub file_prefix: String,
    /// Used to center new floating cards.
    pub viewport: Viewport,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&CollectionConfig::default())
    }
}

impl From<&CollectionConfig> for EngineOptions {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            palette: config.palette.clone(),
            file_prefix: config.file_prefix.clone(),
            viewport: Viewport::default(),
        }
    }
}

/// Options for [`AutosaveEngine::create_card`].
#[derive(Debug, Clone, Default)]
pub struct NewCard {
    pub body: String,
    pub floating: bool,
    /// Start geometry when floating; centered in the viewport if absent.
    pub geometry: Option<FloatingGeometry>,
}

/// A floating card ready to be shown, with its resolved geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatingPanel {
    pub card: Card,
    pub geometry: FloatingGeometry,
}

struct Shared {
    storage: Arc<dyn CardStorage>,
    store: Arc<CardStore>,
    notifier: Arc<dyn Notifier>,
    geometry: GeometryMemory,
    options: EngineOptions,
    sessions: Mutex<HashMap<String, Arc<CardSession>>>,
    /// Serializes pin checks with pin writes across cards.
    pin_gate: tokio::sync::Mutex<()>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct AutosaveEngine {
    shared: Arc<Shared>,
}

impl AutosaveEngine {
    pub fn new(storage: Arc<dyn CardStorage>, notifier: Arc<dyn Notifier>, options: EngineOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                store: Arc::new(CardStore::new()),
                notifier,
                geometry: GeometryMemory::new(),
                options,
                sessions: Mutex::new(HashMap::new()),
                pin_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CardStore> {
        &self.shared.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.shared.options
    }

    pub fn get_card(&self, id: &str) -> Option<Card> {
        self.shared.store.get(id)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<CardSession>>> {
        self.shared.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session for `id`, created from the stored card on first use.
    fn session(&self, id: &str) -> Result<Arc<CardSession>, EngineError> {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }
        let card = self
            .shared
            .store
            .get(id)
            .ok_or_else(|| EngineError::CardNotFound(id.to_string()))?;
        let session = Arc::new(CardSession::from_card(&card));
        sessions.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    fn existing_session(&self, id: &str) -> Option<Arc<CardSession>> {
        self.sessions().get(id).cloned()
    }

    fn notify(&self, notice: Notice) {
        self.shared.notifier.notify(&notice);
    }

    /// Load every document of the collection into the store. Documents
    /// that cannot be read are skipped. Returns the number of cards.
    pub async fn open(&self) -> Result<usize, EngineError> {
        let documents = self.shared.storage.list_documents().await?;
        let mut cards = Vec::with_capacity(documents.len());
        for info in documents {
            match self.shared.storage.read_text(&info.id).await {
                Ok(text) => cards.push(Card::new(
                    info.id,
                    info.created_ms,
                    info.modified_ms,
                    codec::parse_card_content(&text),
                )),
                Err(e) => log::warn!("[inkcard.engine.open] Skipping {}: {}", info.id, e),
            }
        }
        let count = cards.len();
        self.sessions().clear();
        self.shared.store.load(cards);
        log::info!("[inkcard.engine.open] Loaded {} cards", count);
        Ok(count)
    }

    /// Flush pending saves, wait for in-flight writes, then drop all state.
    pub async fn close(&self) {
        let sessions: Vec<(String, Arc<CardSession>)> = self
            .sessions()
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(s)))
            .collect();
        for (id, session) in sessions {
            let pending = session.cancel_debounce();
            if pending || session.is_dirty() {
                let outcome = self.save_content(&id, &session).await;
                log::debug!("[inkcard.engine.close] Flushed {}: {:?}", id, outcome);
            }
            drop(session.chain.lock().await);
        }
        self.sessions().clear();
        self.shared.store.clear();
        self.shared.geometry.clear();
        log::info!("[inkcard.engine.close] Closed");
    }

    /// Re-read a document changed outside the engine. Returns false when
    /// nothing was replaced: the card has unsaved edits, the text is what we
    /// last wrote, or the document is gone (the card is then forgotten).
    pub async fn reload_card(&self, id: &str) -> Result<bool, EngineError> {
        if let Some(session) = self.existing_session(id) {
            return self.reload_session(id, &session).await;
        }
        let Some(text) = self.read_or_forget(id).await? else {
            return Ok(false);
        };
        let parsed = codec::parse_card_content(&text);
        // A session opened during the read owns the card now.
        let opened = {
            let sessions = self.sessions();
            match sessions.get(id) {
                Some(session) => Some(Arc::clone(session)),
                None => {
                    let now = now_millis();
                    let created = self.shared.store.get(id).map_or(now, |c| c.created_ms);
                    self.shared.store.insert(Card::new(id, created, now, parsed));
                    None
                }
            }
        };
        match opened {
            Some(session) => self.reload_session(id, &session).await,
            None => {
                log::info!("[inkcard.engine.reload] Loaded {}", id);
                Ok(true)
            }
        }
    }

    /// Reload under the card's write chain, so in-flight writes land first
    /// and edits made while waiting are kept.
    async fn reload_session(&self, id: &str, session: &Arc<CardSession>) -> Result<bool, EngineError> {
        let mut committed = session.chain.lock().await;
        if session.is_deleted() {
            return Ok(false);
        }
        if session.is_dirty() || session.has_pending_debounce() {
            log::debug!("[inkcard.engine.reload] {} has unsaved edits, keeping draft", id);
            return Ok(false);
        }
        let Some(text) = self.read_or_forget(id).await? else {
            return Ok(false);
        };
        let normalized = text.replace("\r\n", "\n");
        let parsed = codec::parse_card_content(&text);
        let recomposed = codec::compose_content(
            parsed.frontmatter.as_deref(),
            parsed.metadata_body.as_deref(),
            &parsed.body,
        );
        if normalized == committed.last_saved || recomposed == committed.last_saved {
            return Ok(false);
        }
        let now = now_millis();
        let created = self.shared.store.get(id).map_or(now, |c| c.created_ms);
        let card = Card::new(id, created, now, parsed);
        if !session.reset_if_clean(&mut committed, &card) {
            log::debug!("[inkcard.engine.reload] {} edited during reload, keeping draft", id);
            return Ok(false);
        }
        self.shared.store.insert(card);
        log::info!("[inkcard.engine.reload] Reloaded {}", id);
        Ok(true)
    }

    /// Document text, or `None` after forgetting a card whose document is
    /// gone.
    async fn read_or_forget(&self, id: &str) -> Result<Option<String>, EngineError> {
        match self.shared.storage.read_text(id).await {
            Ok(text) => Ok(Some(text)),
            Err(StorageError::NotFound(_)) => {
                self.forget_card(id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a card whose document disappeared.
    pub fn forget_card(&self, id: &str) {
        if let Some(session) = self.sessions().remove(id) {
            session.cancel_debounce();
            session.mark_deleted();
        }
        self.shared.store.remove(id);
        self.shared.geometry.forget(id);
        log::info!("[inkcard.engine] Forgot {}", id);
    }

    /// Delete the card's document. A pending debounced save is cancelled
    /// and nothing queued behind the delete will write.
    pub async fn delete_card(&self, id: &str) -> Result<(), EngineError> {
        let session = self.session(id)?;
        session.cancel_debounce();
        let _committed = session.chain.lock().await;
        if let Err(e) = self.shared.storage.delete_text(id).await {
            log::error!("[inkcard.engine.delete] Failed to delete {}: {}", id, e);
            self.notify(Notice::DeleteFailed { id: id.to_string() });
            if session.is_dirty() {
                self.arm_debounce(id, &session);
            }
            return Err(e.into());
        }
        session.mark_deleted();
        self.sessions().remove(id);
        self.shared.store.remove(id);
        self.shared.geometry.forget(id);
        log::info!("[inkcard.engine.delete] Deleted {}", id);
        Ok(())
    }

    /// Create a new card document with a fresh name, a palette color and,
    /// when requested, floating geometry.
    pub async fn create_card(&self, options: NewCard) -> Result<Card, EngineError> {
        match self.try_create_card(options).await {
            Ok(card) => Ok(card),
            Err(e) => {
                log::error!("[inkcard.engine.create] Failed to create card: {}", e);
                self.notify(Notice::CreateFailed);
                Err(e)
            }
        }
    }

    async fn try_create_card(&self, options: NewCard) -> Result<Card, EngineError> {
        let path = self.unique_path().await?;
        let mut patch = MetadataPatch {
            color: Some(self.pick_color()),
            pinned: Some(false),
            ..Default::default()
        };
        let start = options.floating.then(|| {
            options.geometry.unwrap_or_else(|| {
                geometry::centered_geometry(
                    self.shared.options.viewport,
                    geometry::DEFAULT_FLOATING_WIDTH,
                    geometry::FALLBACK_GEOMETRY.height,
                )
            })
        });
        if let Some(g) = start {
            patch.floating = Some(FloatingChange::Floating(Some(g)));
        }
        let block = metadata::build_metadata_block(None, &patch, None);
        let text = codec::compose_content(None, Some(&block), &options.body);

        let info = self.shared.storage.create_text(&path, &text).await?;
        if let Some(g) = start {
            self.shared.geometry.remember(&info.id, g);
        }
        let card = Card::new(
            info.id,
            info.created_ms,
            info.modified_ms,
            codec::parse_card_content(&text),
        );
        self.shared.store.insert(card.clone());
        log::info!("[inkcard.engine.create] Created {}", card.id);
        Ok(card)
    }

    /// `<prefix>-YYYYMMDD-HHMM-XXXX.md`, with `-2`, `-3`, ... appended while
    /// the name is taken.
    async fn unique_path(&self) -> Result<String, EngineError> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M");
        let code = uuid::Uuid::new_v4().simple().to_string()[..4].to_uppercase();
        let base = format!("{}-{}-{}", self.shared.options.file_prefix, stamp, code);
        for n in 1..=MAX_NAME_ATTEMPTS {
            let candidate = if n == 1 {
                format!("{}.md", base)
            } else {
                format!("{}-{}.md", base, n)
            };
            if !self.shared.storage.exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Ok(format!("{}-{}.md", base, now_millis()))
    }

    fn pick_color(&self) -> String {
        let palette: Vec<String> = self
            .shared
            .options
            .palette
            .iter()
            .filter_map(|c| codec::normalize_hex_color(c))
            .collect();
        let choices: Vec<String> = if palette.is_empty() {
            CARD_COLORS.iter().map(|c| c.to_string()).collect()
        } else {
            palette
        };
        let roll = uuid::Uuid::new_v4().as_bytes()[0] as usize;
        choices[roll % choices.len()].clone()
    }

    /// Docked cards for the list view.
    pub fn list_view(&self, sort: SortMode, query: &str) -> Vec<Card> {
        self.shared.store.list_view(sort, query)
    }

    /// Floating cards with resolved geometry. Remembered positions are
    /// consumed.
    pub fn materialize_floating_panels(
        &self,
        sort: SortMode,
        viewport: Viewport,
        defaults: &PanelDefaults,
    ) -> Vec<FloatingPanel> {
        self.shared
            .store
            .floating_cards(sort)
            .into_iter()
            .enumerate()
            .map(|(index, card)| {
                let remembered = self.shared.geometry.take(&card.id);
                let geometry =
                    geometry::resolve_panel_geometry(remembered, card.content.geometry, defaults, index, viewport);
                FloatingPanel { card, geometry }
            })
            .collect()
    }

    /// Current draft of a card, if it has been opened for editing.
    pub fn draft(&self, id: &str) -> Option<DraftState> {
        self.existing_session(id).map(|s| s.draft_state())
    }

    pub fn has_pending_save(&self, id: &str) -> bool {
        self.existing_session(id)
            .is_some_and(|s| s.has_pending_debounce())
    }

    pub fn set_tag_editor_focused(&self, id: &str, focused: bool) -> Result<(), EngineError> {
        self.session(id)?.set_tag_editor_focused(focused);
        Ok(())
    }
}
