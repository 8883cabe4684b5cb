/// List-view ordering and filtering.
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::Card;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    CtimeAsc,
    CtimeDesc,
    MtimeAsc,
    #[default]
    MtimeDesc,
}

impl SortMode {
    pub const ALL: [SortMode; 4] = [
        SortMode::CtimeAsc,
        SortMode::CtimeDesc,
        SortMode::MtimeAsc,
        SortMode::MtimeDesc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CtimeAsc => "ctime-asc",
            Self::CtimeDesc => "ctime-desc",
            Self::MtimeAsc => "mtime-asc",
            Self::MtimeDesc => "mtime-desc",
        }
    }

    fn compare(&self, a: &Card, b: &Card) -> Ordering {
        match self {
            Self::CtimeAsc => a.created_ms.cmp(&b.created_ms),
            Self::CtimeDesc => b.created_ms.cmp(&a.created_ms),
            Self::MtimeAsc => a.modified_ms.cmp(&b.modified_ms),
            Self::MtimeDesc => b.modified_ms.cmp(&a.modified_ms),
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| format!("invalid sort mode: {}", s))
    }
}

/// Sort in place: pinned cards first, then by `mode`. Ties fall back to the
/// id so the order is total.
pub fn sort_cards(cards: &mut [Card], mode: SortMode) {
    cards.sort_by(|a, b| {
        b.content
            .is_pinned
            .cmp(&a.content.is_pinned)
            .then_with(|| mode.compare(a, b))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Lower-cased search tokens. Splits on any Unicode whitespace, which
/// includes the ideographic space.
fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '\u{3000}')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn matches_tokens(card: &Card, tokens: &[String]) -> bool {
    if tokens.is_empty() {
        return true;
    }
    let body = card.content.body.to_lowercase();
    let tags = card.content.tags_line.to_lowercase();
    tokens.iter().all(|t| body.contains(t.as_str()) || tags.contains(t.as_str()))
}

/// Keep cards matching `query`. An empty query keeps everything.
pub fn filter_cards(cards: Vec<Card>, query: &str) -> Vec<Card> {
    let tokens = query_tokens(query);
    cards.into_iter().filter(|c| matches_tokens(c, &tokens)).collect()
}
