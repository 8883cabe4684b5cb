use serde::{Deserialize, Serialize};

/// Written into every metadata block so hand editors know the block is generated.
pub const METADATA_WARNING: &str = "Managed by inkcard. Do not edit or remove this block by hand.";

/// Maximum number of images a single card may reference.
pub const MAX_IMAGES: usize = 8;

/// Minimum width of a floating panel, in pixels.
pub const FLOATING_MIN_WIDTH: f64 = 280.0;

/// Minimum height of a floating panel's body area, in pixels.
pub const FLOATING_MIN_BODY_HEIGHT: f64 = 40.0;

/// Colors offered by the card color menu. New cards pick one of these.
pub const CARD_COLORS: &[&str] = &[
    "#4A86E9", "#7B61FF", "#47B881", "#F6C445", "#F59E0B", "#F05D6C", "#9CA3AF",
];

/// Round half up, matching how panel coordinates are reported by the UI.
pub(crate) fn round_px(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Position and size of a floating panel. `height` is the body height,
/// not the full panel height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatingGeometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl FloatingGeometry {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Whole-pixel geometry that respects the minimum panel size.
    pub fn normalized(self) -> Self {
        Self {
            left: round_px(self.left),
            top: round_px(self.top),
            width: round_px(self.width).max(FLOATING_MIN_WIDTH),
            height: round_px(self.height).max(FLOATING_MIN_BODY_HEIGHT),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }
}

/// Structured view of one document, as produced by the codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCard {
    /// Interior of the leading `---` block, kept verbatim.
    pub frontmatter: Option<String>,
    /// Raw interior of the metadata block. Writes rebuild from this.
    pub metadata_body: Option<String>,
    pub body: String,
    /// Display form of the tags: empty, or ` #a #b`.
    pub tags_line: String,
    pub images: Vec<String>,
    pub color: Option<String>,
    pub is_pinned: bool,
    pub is_floating: bool,
    pub geometry: Option<FloatingGeometry>,
}

/// A parsed document together with its identity and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Storage path of the document.
    pub id: String,
    pub created_ms: i64,
    pub modified_ms: i64,
    #[serde(flatten)]
    pub content: ParsedCard,
}

impl Card {
    pub fn new(id: impl Into<String>, created_ms: i64, modified_ms: i64, content: ParsedCard) -> Self {
        Self {
            id: id.into(),
            created_ms,
            modified_ms,
            content,
        }
    }
}

/// Partial update merged into a stored [`Card`]. `None` leaves a field as is;
/// nested options clear the field when set to `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardPatch {
    pub frontmatter: Option<Option<String>>,
    pub metadata_body: Option<Option<String>>,
    pub body: Option<String>,
    pub tags_line: Option<String>,
    pub images: Option<Vec<String>>,
    pub color: Option<Option<String>>,
    pub is_pinned: Option<bool>,
    pub is_floating: Option<bool>,
    pub geometry: Option<Option<FloatingGeometry>>,
    pub modified_ms: Option<i64>,
}

impl CardPatch {
    /// Patch replacing every parsed field with `parsed`.
    pub fn from_parsed(parsed: ParsedCard) -> Self {
        Self {
            frontmatter: Some(parsed.frontmatter),
            metadata_body: Some(parsed.metadata_body),
            body: Some(parsed.body),
            tags_line: Some(parsed.tags_line),
            images: Some(parsed.images),
            color: Some(parsed.color),
            is_pinned: Some(parsed.is_pinned),
            is_floating: Some(parsed.is_floating),
            geometry: Some(parsed.geometry),
            modified_ms: None,
        }
    }

    pub fn with_modified(mut self, modified_ms: i64) -> Self {
        self.modified_ms = Some(modified_ms);
        self
    }

    pub fn apply_to(self, card: &mut Card) {
        let content = &mut card.content;
        if let Some(v) = self.frontmatter {
            content.frontmatter = v;
        }
        if let Some(v) = self.metadata_body {
            content.metadata_body = v;
        }
        if let Some(v) = self.body {
            content.body = v;
        }
        if let Some(v) = self.tags_line {
            content.tags_line = v;
        }
        if let Some(v) = self.images {
            content.images = v;
        }
        if let Some(v) = self.color {
            content.color = v;
        }
        if let Some(v) = self.is_pinned {
            content.is_pinned = v;
        }
        if let Some(v) = self.is_floating {
            content.is_floating = v;
        }
        if let Some(v) = self.geometry {
            content.geometry = v;
        }
        if let Some(v) = self.modified_ms {
            card.modified_ms = v;
        }
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
