/// Write paths of the autosave engine.
///
/// Content edits (body, tag line) are debounced; images and structural
/// changes (pin, color, floating, geometry) write at once. Both kinds run
/// inside the card's write chain and compose from the committed baseline
/// they find there, so a structural write never undoes a content write that
/// landed before it and vice versa.
use std::sync::Arc;

use super::session::CardSession;
use super::{AutosaveEngine, EngineError, FieldChange, WriteOutcome};
use crate::codec;
use crate::geometry::FALLBACK_GEOMETRY;
use crate::metadata::{self, FloatingChange, MetadataPatch};
use crate::notice::Notice;
use crate::types::{now_millis, CardPatch, FloatingGeometry, MAX_IMAGES};

impl AutosaveEngine {
    /// Apply an edit to the card's draft and (re)start its debounce timer.
    /// Must be called from within a Tokio runtime.
    pub fn schedule_save(&self, id: &str, change: FieldChange) -> Result<(), EngineError> {
        let session = self.session(id)?;
        session.edit(|draft| match change {
            FieldChange::Body(body) => draft.body = body,
            FieldChange::TagsLine(line) => draft.tags_line = line,
        });
        self.arm_debounce(id, &session);
        Ok(())
    }

    /// Save now, skipping the debounce.
    pub async fn flush_save(&self, id: &str) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        session.cancel_debounce();
        Ok(self.save_content(id, &session).await)
    }

    pub(super) fn arm_debounce(&self, id: &str, session: &Arc<CardSession>) {
        let delay = self.shared.options.debounce;
        session.arm_debounce(|generation| {
            let engine = self.clone();
            let session = Arc::clone(session);
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !session.claim_debounce(generation) {
                    return;
                }
                // Detached so re-arming the timer cannot abort a started write.
                tokio::spawn(async move {
                    engine.save_content(&id, &session).await;
                });
            })
        })
    }

    /// Persist the current draft through the write chain.
    pub(super) async fn save_content(&self, id: &str, session: &Arc<CardSession>) -> WriteOutcome {
        let request_id = session.next_request();
        let mut committed = session.chain.lock().await;
        if session.is_deleted() {
            return WriteOutcome::Superseded;
        }
        if !session.is_current_request(request_id) {
            log::debug!("[inkcard.autosave.write] Request {} for {} superseded", request_id, id);
            return WriteOutcome::Superseded;
        }

        let draft = session.snapshot_for_save();
        let patch = MetadataPatch {
            tags_line: Some(draft.tags_line),
            images: Some(draft.images),
            ..Default::default()
        };
        let block = metadata::build_metadata_block(
            committed.metadata_body.as_deref(),
            &patch,
            self.shared.geometry.get(id),
        );
        let next = codec::compose_content(committed.frontmatter.as_deref(), Some(&block), &draft.body);
        if next == committed.last_saved {
            session.mark_saved(draft.generation);
            log::debug!("[inkcard.autosave.write] {} unchanged, skipping write", id);
            return WriteOutcome::Unchanged;
        }

        match self.shared.storage.write_text(id, &next).await {
            Ok(()) => {
                self.commit(id, &mut committed, next);
                session.mark_saved(draft.generation);
                log::debug!("[inkcard.autosave.write] Saved {}", id);
                WriteOutcome::Written
            }
            Err(e) => {
                log::error!("[inkcard.autosave.write] Failed to save {}: {}", id, e);
                self.notify(Notice::SaveFailed { id: id.to_string() });
                WriteOutcome::Failed
            }
        }
    }

    /// Record a confirmed write as the new baseline and patch the store.
    fn commit(&self, id: &str, committed: &mut super::session::Committed, text: String) {
        let parsed = codec::parse_card_content(&text);
        committed.frontmatter = parsed.frontmatter.clone();
        committed.metadata_body = parsed.metadata_body.clone();
        committed.body = parsed.body.clone();
        committed.last_saved = text;
        self.shared
            .store
            .patch(id, CardPatch::from_parsed(parsed).with_modified(now_millis()));
    }

    /// Immediate metadata write on the committed baseline.
    async fn write_structural(
        &self,
        id: &str,
        session: &Arc<CardSession>,
        patch: MetadataPatch,
        on_failure: Notice,
    ) -> Result<WriteOutcome, EngineError> {
        let mut committed = session.chain.lock().await;
        if session.is_deleted() {
            return Err(EngineError::CardNotFound(id.to_string()));
        }
        let block = metadata::build_metadata_block(
            committed.metadata_body.as_deref(),
            &patch,
            self.shared.geometry.get(id),
        );
        let next = codec::compose_content(committed.frontmatter.as_deref(), Some(&block), &committed.body);
        if next == committed.last_saved {
            return Ok(WriteOutcome::Unchanged);
        }
        match self.shared.storage.write_text(id, &next).await {
            Ok(()) => {
                self.commit(id, &mut committed, next);
                log::info!("[inkcard.autosave.structural] Updated {}", id);
                Ok(WriteOutcome::Written)
            }
            Err(e) => {
                log::error!("[inkcard.autosave.structural] Failed to update {}: {}", id, e);
                self.notify(on_failure);
                Ok(WriteOutcome::Failed)
            }
        }
    }

    /// Pin or unpin a card. Pinning fails with [`EngineError::PinConflict`],
    /// writing nothing, while another card is pinned.
    pub async fn set_pinned(&self, id: &str, pinned: bool) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        let _gate = self.shared.pin_gate.lock().await;
        if pinned {
            if let Some(other) = self.shared.store.pinned_card_except(id) {
                log::info!("[inkcard.autosave.pin] Refusing to pin {}: {} is pinned", id, other);
                self.notify(Notice::PinConflict {
                    id: id.to_string(),
                    pinned: other.clone(),
                });
                return Err(EngineError::PinConflict {
                    requested: id.to_string(),
                    pinned: other,
                });
            }
        }
        let patch = MetadataPatch {
            pinned: Some(pinned),
            ..Default::default()
        };
        self.write_structural(id, &session, patch, Notice::PinFailed { id: id.to_string() })
            .await
    }

    /// Set the card color. Anything but `#RRGGBB` is ignored.
    pub async fn set_color(&self, id: &str, color: &str) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        let Some(color) = codec::normalize_hex_color(color) else {
            log::debug!("[inkcard.autosave.color] Ignoring invalid color {:?} for {}", color, id);
            return Ok(WriteOutcome::Unchanged);
        };
        let patch = MetadataPatch {
            color: Some(color),
            ..Default::default()
        };
        self.write_structural(id, &session, patch, Notice::ColorFailed { id: id.to_string() })
            .await
    }

    /// Float or dock a card. Floating unpins it and records the start
    /// geometry: `geometry`, else the remembered or persisted one, else a
    /// fixed fallback. Docking forgets the remembered geometry.
    pub async fn set_floating(
        &self,
        id: &str,
        floating: bool,
        geometry: Option<FloatingGeometry>,
    ) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        let patch = if floating {
            let start = geometry
                .filter(FloatingGeometry::is_finite)
                .or_else(|| self.shared.geometry.get(id))
                .or_else(|| self.shared.store.get(id).and_then(|c| c.content.geometry))
                .unwrap_or(FALLBACK_GEOMETRY);
            self.shared.geometry.remember(id, start);
            MetadataPatch {
                pinned: Some(false),
                floating: Some(FloatingChange::Floating(Some(start))),
                ..Default::default()
            }
        } else {
            self.shared.geometry.forget(id);
            MetadataPatch {
                floating: Some(FloatingChange::Docked),
                ..Default::default()
            }
        };
        self.write_structural(id, &session, patch, Notice::FloatingFailed { id: id.to_string() })
            .await
    }

    /// End of a drag or resize. Always remembered; written only when the
    /// card is floating and the normalized geometry differs from the
    /// persisted one.
    pub async fn persist_geometry(&self, id: &str, geometry: FloatingGeometry) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        if !geometry.is_finite() {
            return Ok(WriteOutcome::Unchanged);
        }
        self.shared.geometry.remember(id, geometry);
        let card = self
            .shared
            .store
            .get(id)
            .ok_or_else(|| EngineError::CardNotFound(id.to_string()))?;
        let normalized = geometry.normalized();
        if !card.content.is_floating || card.content.geometry.map(FloatingGeometry::normalized) == Some(normalized) {
            return Ok(WriteOutcome::Unchanged);
        }
        let patch = MetadataPatch {
            floating: Some(FloatingChange::Floating(Some(normalized))),
            ..Default::default()
        };
        self.write_structural(id, &session, patch, Notice::FloatingFailed { id: id.to_string() })
            .await
    }

    /// Attach an image and save at once. Duplicates and a ninth image are
    /// refused with a notice.
    pub async fn add_image(&self, id: &str, path: &str) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        let path = path.trim();
        if path.is_empty() {
            return Ok(WriteOutcome::Unchanged);
        }
        let added = session.try_edit(|draft| {
            if draft.images.iter().any(|p| p == path) {
                return Err(Notice::ImageDuplicate {
                    id: id.to_string(),
                    path: path.to_string(),
                });
            }
            if draft.images.len() >= MAX_IMAGES {
                return Err(Notice::ImageLimit { id: id.to_string() });
            }
            draft.images.push(path.to_string());
            Ok(())
        });
        if let Err(notice) = added {
            self.notify(notice);
            return Ok(WriteOutcome::Unchanged);
        }
        session.cancel_debounce();
        Ok(self.save_content(id, &session).await)
    }

    /// Detach an image and save at once. Unknown paths are a no-op.
    pub async fn remove_image(&self, id: &str, path: &str) -> Result<WriteOutcome, EngineError> {
        let session = self.session(id)?;
        let path = path.trim();
        let removed = session.try_edit(|draft| {
            let before = draft.images.len();
            draft.images.retain(|p| p != path);
            if draft.images.len() == before {
                Err(())
            } else {
                Ok(())
            }
        });
        if removed.is_err() {
            return Ok(WriteOutcome::Unchanged);
        }
        session.cancel_debounce();
        Ok(self.save_content(id, &session).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::engine::EngineOptions;
    use crate::notice::Notifier;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::{CardStorage, DocumentInfo, StorageError};

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(notice.clone());
        }
    }

    /// Memory storage whose writes wait for a permit.
    struct GatedStorage {
        inner: Arc<MemoryStorage>,
        gate: Semaphore,
    }

    #[async_trait]
    impl CardStorage for GatedStorage {
        async fn list_documents(&self) -> Result<Vec<DocumentInfo>, StorageError> {
            self.inner.list_documents().await
        }
        async fn read_text(&self, id: &str) -> Result<String, StorageError> {
            self.inner.read_text(id).await
        }
        async fn write_text(&self, id: &str, text: &str) -> Result<(), StorageError> {
            self.gate.acquire().await.unwrap().forget();
            self.inner.write_text(id, text).await
        }
        async fn create_text(&self, path: &str, text: &str) -> Result<DocumentInfo, StorageError> {
            self.inner.create_text(path, text).await
        }
        async fn delete_text(&self, id: &str) -> Result<(), StorageError> {
            self.inner.delete_text(id).await
        }
        async fn exists(&self, path: &str) -> Result<bool, StorageError> {
            self.inner.exists(path).await
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(300);
    const PAST_DEBOUNCE: Duration = Duration::from_millis(400);

    fn canonical_doc(patch: &MetadataPatch, body: &str) -> String {
        let block = metadata::build_metadata_block(None, patch, None);
        codec::compose_content(None, Some(&block), body)
    }

    fn plain_doc(body: &str) -> String {
        canonical_doc(&MetadataPatch::default(), body)
    }

    fn pinned_doc(body: &str) -> String {
        canonical_doc(
            &MetadataPatch {
                pinned: Some(true),
                ..Default::default()
            },
            body,
        )
    }

    struct Harness {
        engine: AutosaveEngine,
        storage: Arc<MemoryStorage>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness(docs: &[(&str, String)]) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        for (id, text) in docs {
            storage.insert(id, text);
        }
        let notifier = Arc::new(RecordingNotifier::default());
        let options = EngineOptions {
            debounce: DEBOUNCE,
            ..Default::default()
        };
        let engine = AutosaveEngine::new(storage.clone(), notifier.clone(), options);
        engine.open().await.unwrap();
        Harness {
            engine,
            storage,
            notifier,
        }
    }

    async fn gated_harness(body: &str) -> (AutosaveEngine, Arc<MemoryStorage>, Arc<GatedStorage>) {
        let inner = Arc::new(MemoryStorage::new().with_document("a.md", &plain_doc(body)));
        let gated = Arc::new(GatedStorage {
            inner: inner.clone(),
            gate: Semaphore::new(0),
        });
        let options = EngineOptions {
            debounce: DEBOUNCE,
            ..Default::default()
        };
        let engine = AutosaveEngine::new(gated.clone(), Arc::new(RecordingNotifier::default()), options);
        engine.open().await.unwrap();
        (engine, inner, gated)
    }

    fn bodies(storage: &MemoryStorage) -> Vec<String> {
        storage
            .write_log()
            .into_iter()
            .map(|(_, text)| codec::parse_card_content(&text).body)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_write() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        h.engine.schedule_save("a.md", FieldChange::Body("hello w".into())).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.engine.schedule_save("a.md", FieldChange::Body("hello world".into())).unwrap();
        assert!(h.engine.has_pending_save("a.md"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(h.storage.write_count(), 0);

        tokio::time::sleep(PAST_DEBOUNCE).await;
        assert_eq!(bodies(&h.storage), vec!["hello world"]);
        assert!(!h.engine.has_pending_save("a.md"));
        assert_eq!(h.engine.get_card("a.md").unwrap().content.body, "hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_inflight_write_is_written_after() {
        let (engine, inner, gated) = gated_harness("zero").await;

        engine.schedule_save("a.md", FieldChange::Body("one".into())).unwrap();
        tokio::time::sleep(PAST_DEBOUNCE).await;
        // First write is now blocked on the gate.
        engine.schedule_save("a.md", FieldChange::Body("two".into())).unwrap();
        tokio::time::sleep(PAST_DEBOUNCE).await;
        assert_eq!(inner.write_count(), 0);

        gated.gate.add_permits(2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bodies(&inner), vec!["one", "two"]);
        assert_eq!(engine.get_card("a.md").unwrap().content.body, "two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_stale_request_is_superseded() {
        let (engine, inner, gated) = gated_harness("zero").await;

        engine.schedule_save("a.md", FieldChange::Body("one".into())).unwrap();
        tokio::time::sleep(PAST_DEBOUNCE).await;

        engine.schedule_save("a.md", FieldChange::Body("two".into())).unwrap();
        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.flush_save("a.md").await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        engine.schedule_save("a.md", FieldChange::Body("three".into())).unwrap();
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.flush_save("a.md").await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        gated.gate.add_permits(3);
        assert_eq!(first.await.unwrap(), WriteOutcome::Superseded);
        assert_eq!(second.await.unwrap(), WriteOutcome::Written);
        assert_eq!(bodies(&inner), vec!["one", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_behind_inflight_write_keeps_new_edit() {
        let (engine, inner, gated) = gated_harness("hello").await;

        let color = tokio::spawn({
            let engine = engine.clone();
            async move { engine.set_color("a.md", "#f05d6c").await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let reload = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reload_card("a.md").await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        engine.schedule_save("a.md", FieldChange::Body("user edit".into())).unwrap();

        gated.gate.add_permits(2);
        assert_eq!(color.await.unwrap(), WriteOutcome::Written);
        assert!(!reload.await.unwrap());
        tokio::time::sleep(PAST_DEBOUNCE).await;

        assert_eq!(engine.draft("a.md").unwrap().body, "user edit");
        let on_disk = codec::parse_card_content(&inner.text("a.md").unwrap());
        assert_eq!(on_disk.body, "user edit");
        assert_eq!(on_disk.color.as_deref(), Some("#F05D6C"));
        let stored = engine.get_card("a.md").unwrap();
        assert_eq!(stored.content.body, "user edit");
        assert_eq!(stored.content.color.as_deref(), Some("#F05D6C"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_flush_writes_nothing() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        assert_eq!(h.engine.flush_save("a.md").await.unwrap(), WriteOutcome::Unchanged);

        h.engine.schedule_save("a.md", FieldChange::Body("hello".into())).unwrap();
        tokio::time::sleep(PAST_DEBOUNCE).await;
        assert_eq!(h.storage.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_keeps_draft_for_retry() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        h.storage.set_failing(true);
        h.engine.schedule_save("a.md", FieldChange::Body("new text".into())).unwrap();
        assert_eq!(h.engine.flush_save("a.md").await.unwrap(), WriteOutcome::Failed);
        assert_eq!(
            h.notifier.notices(),
            vec![Notice::SaveFailed { id: "a.md".to_string() }]
        );
        assert_eq!(h.engine.get_card("a.md").unwrap().content.body, "hello");
        assert_eq!(h.engine.draft("a.md").unwrap().body, "new text");

        h.storage.set_failing(false);
        assert_eq!(h.engine.flush_save("a.md").await.unwrap(), WriteOutcome::Written);
        assert_eq!(bodies(&h.storage), vec!["new text"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_conflict_writes_nothing() {
        let h = harness(&[("a.md", pinned_doc("a")), ("b.md", plain_doc("b"))]).await;
        let before_a = h.storage.text("a.md");
        let before_b = h.storage.text("b.md");

        let err = h.engine.set_pinned("b.md", true).await.unwrap_err();
        assert!(matches!(err, EngineError::PinConflict { ref pinned, .. } if pinned == "a.md"));
        assert_eq!(h.storage.write_count(), 0);
        assert_eq!(h.storage.text("a.md"), before_a);
        assert_eq!(h.storage.text("b.md"), before_b);
        assert_eq!(
            h.notifier.notices(),
            vec![Notice::PinConflict {
                id: "b.md".to_string(),
                pinned: "a.md".to_string()
            }]
        );

        assert_eq!(h.engine.set_pinned("a.md", false).await.unwrap(), WriteOutcome::Written);
        assert_eq!(h.engine.set_pinned("b.md", true).await.unwrap(), WriteOutcome::Written);
        assert!(h.engine.get_card("b.md").unwrap().content.is_pinned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_write_keeps_pending_body_edit() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        h.engine.schedule_save("a.md", FieldChange::Body("draft".into())).unwrap();
        assert_eq!(h.engine.set_color("a.md", "#f05d6c").await.unwrap(), WriteOutcome::Written);
        assert!(h.engine.has_pending_save("a.md"));

        tokio::time::sleep(PAST_DEBOUNCE).await;
        let text = h.storage.text("a.md").unwrap();
        let card = codec::parse_card_content(&text);
        assert_eq!(card.body, "draft");
        assert_eq!(card.color.as_deref(), Some("#F05D6C"));
        assert_eq!(h.storage.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_color_is_ignored() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        assert_eq!(h.engine.set_color("a.md", "red").await.unwrap(), WriteOutcome::Unchanged);
        assert_eq!(h.storage.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_floating_unpins_and_uses_fallback_geometry() {
        let h = harness(&[("a.md", pinned_doc("hello"))]).await;
        assert_eq!(
            h.engine.set_floating("a.md", true, None).await.unwrap(),
            WriteOutcome::Written
        );
        let card = h.engine.get_card("a.md").unwrap();
        assert!(card.content.is_floating);
        assert!(!card.content.is_pinned);
        assert_eq!(card.content.geometry, Some(FALLBACK_GEOMETRY));

        assert_eq!(
            h.engine.set_floating("a.md", false, None).await.unwrap(),
            WriteOutcome::Written
        );
        let text = h.storage.text("a.md").unwrap();
        assert!(!text.contains("isfloating"));
        assert!(!text.contains("floatx"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_geometry_writes_only_changes() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        let g = FloatingGeometry::new(40.0, 50.0, 300.0, 120.0);
        assert_eq!(h.engine.persist_geometry("a.md", g).await.unwrap(), WriteOutcome::Unchanged);

        h.engine.set_floating("a.md", true, Some(g)).await.unwrap();
        assert_eq!(h.storage.write_count(), 1);
        assert_eq!(
            h.engine.persist_geometry("a.md", FloatingGeometry::new(40.2, 49.8, 300.0, 120.0)).await.unwrap(),
            WriteOutcome::Unchanged
        );
        assert_eq!(
            h.engine.persist_geometry("a.md", FloatingGeometry::new(80.0, 90.0, 300.0, 120.0)).await.unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(h.storage.write_count(), 2);
        assert_eq!(
            h.engine.get_card("a.md").unwrap().content.geometry,
            Some(FloatingGeometry::new(80.0, 90.0, 300.0, 120.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_line_normalized_only_when_editor_unfocused() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        h.engine.set_tag_editor_focused("a.md", true).unwrap();
        h.engine.schedule_save("a.md", FieldChange::TagsLine("plot, #scene".into())).unwrap();
        assert_eq!(h.engine.flush_save("a.md").await.unwrap(), WriteOutcome::Written);
        assert_eq!(h.engine.draft("a.md").unwrap().tags_line, "plot, #scene");
        assert!(h.storage.text("a.md").unwrap().contains("\"tags\": \"#plot,#scene\""));

        h.engine.set_tag_editor_focused("a.md", false).unwrap();
        assert_eq!(h.engine.flush_save("a.md").await.unwrap(), WriteOutcome::Unchanged);
        assert_eq!(h.engine.draft("a.md").unwrap().tags_line, " #plot #scene");
        assert_eq!(h.engine.get_card("a.md").unwrap().content.tags_line, " #plot #scene");
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_duplicate_and_limit() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        assert_eq!(h.engine.add_image("a.md", "img/1.png").await.unwrap(), WriteOutcome::Written);
        assert_eq!(h.engine.add_image("a.md", "img/1.png").await.unwrap(), WriteOutcome::Unchanged);
        for i in 2..=MAX_IMAGES {
            h.engine.add_image("a.md", &format!("img/{}.png", i)).await.unwrap();
        }
        assert_eq!(h.engine.add_image("a.md", "img/9.png").await.unwrap(), WriteOutcome::Unchanged);
        assert_eq!(h.storage.write_count(), MAX_IMAGES);
        assert_eq!(h.engine.get_card("a.md").unwrap().content.images.len(), MAX_IMAGES);
        assert_eq!(
            h.notifier.notices(),
            vec![
                Notice::ImageDuplicate {
                    id: "a.md".to_string(),
                    path: "img/1.png".to_string()
                },
                Notice::ImageLimit { id: "a.md".to_string() },
            ]
        );

        assert_eq!(h.engine.remove_image("a.md", "img/1.png").await.unwrap(), WriteOutcome::Written);
        assert_eq!(h.engine.remove_image("a.md", "img/1.png").await.unwrap(), WriteOutcome::Unchanged);
        assert_eq!(h.engine.get_card("a.md").unwrap().content.images[0], "img/2.png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_pending_save() {
        let h = harness(&[("a.md", plain_doc("hello"))]).await;
        h.engine.schedule_save("a.md", FieldChange::Body("never".into())).unwrap();
        h.engine.delete_card("a.md").await.unwrap();
        tokio::time::sleep(PAST_DEBOUNCE).await;

        assert_eq!(h.storage.write_count(), 0);
        assert_eq!(h.storage.text("a.md"), None);
        assert!(h.engine.get_card("a.md").is_none());
        assert!(matches!(
            h.engine.flush_save("a.md").await,
            Err(EngineError::CardNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_saves() {
        let h = harness(&[("a.md", plain_doc("hello")), ("b.md", plain_doc("b"))]).await;
        h.engine.schedule_save("a.md", FieldChange::Body("bye".into())).unwrap();
        h.engine.close().await;

        assert_eq!(bodies(&h.storage), vec!["bye"]);
        assert!(h.engine.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_card() {
        let h = harness(&[]).await;
        assert!(matches!(
            h.engine.schedule_save("nope.md", FieldChange::Body("x".into())),
            Err(EngineError::CardNotFound(_))
        ));
        assert!(matches!(
            h.engine.set_pinned("nope.md", true).await,
            Err(EngineError::CardNotFound(_))
        ));
    }
}
