/// In-memory card collection.
///
/// The store only ever holds confirmed state: parsed documents and the
/// patches applied after successful writes. Each patch runs under the write
/// lock, so readers see a card either before or after the whole patch.
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::query::{self, SortMode};
use crate::types::{Card, CardPatch};

#[derive(Debug, Default)]
pub struct CardStore {
    cards: RwLock<HashMap<String, Card>>,
}

impl CardStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Card>> {
        self.cards.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Card>> {
        self.cards.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole collection.
    pub fn load(&self, cards: impl IntoIterator<Item = Card>) {
        let next: HashMap<String, Card> = cards.into_iter().map(|c| (c.id.clone(), c)).collect();
        *self.write() = next;
    }

    pub fn insert(&self, card: Card) {
        self.write().insert(card.id.clone(), card);
    }

    /// Merge `patch` into the card. Returns false, changing nothing, when
    /// the id is unknown.
    pub fn patch(&self, id: &str, patch: CardPatch) -> bool {
        match self.write().get_mut(id) {
            Some(card) => {
                patch.apply_to(card);
                true
            }
            None => {
                log::debug!("[inkcard.store] Patch for unknown card {} ignored", id);
                false
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Card> {
        self.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Card> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Consistent copy of every card, ordered by id.
    pub fn snapshot(&self) -> Vec<Card> {
        let mut cards: Vec<Card> = self.read().values().cloned().collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        cards
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Id of a pinned card other than `id`, if any.
    pub fn pinned_card_except(&self, id: &str) -> Option<String> {
        self.read()
            .values()
            .filter(|c| c.content.is_pinned && c.id != id)
            .map(|c| c.id.clone())
            .min()
    }

    /// Docked cards matching `query`, pinned first.
    pub fn list_view(&self, sort: SortMode, query: &str) -> Vec<Card> {
        let docked: Vec<Card> = self
            .read()
            .values()
            .filter(|c| !c.content.is_floating)
            .cloned()
            .collect();
        let mut cards = query::filter_cards(docked, query);
        query::sort_cards(&mut cards, sort);
        cards
    }

    /// Floating cards in panel order.
    pub fn floating_cards(&self, sort: SortMode) -> Vec<Card> {
        let mut cards: Vec<Card> = self
            .read()
            .values()
            .filter(|c| c.content.is_floating)
            .cloned()
            .collect();
        query::sort_cards(&mut cards, sort);
        cards
    }
}
