/// Builds the canonical metadata block written into a card.
///
/// The codec only knows the wrapper syntax; this module decides what goes in
/// the block. Output field order is fixed so two builds of the same state are
/// byte-identical, which is what the autosave engine relies on to skip
/// redundant writes.
use serde::Serialize;
use serde_json::{Map, Value};

use crate::codec;
use crate::tokens;
use crate::types::{FloatingGeometry, METADATA_WARNING};

/// Serialized shape of the metadata block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardMetadata {
    pub warning: String,
    #[serde(rename = "ispinned")]
    pub is_pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<String>,
    #[serde(rename = "isfloating", skip_serializing_if = "std::ops::Not::not")]
    pub is_floating: bool,
    #[serde(rename = "floatx", skip_serializing_if = "Option::is_none")]
    pub float_x: Option<i64>,
    #[serde(rename = "floaty", skip_serializing_if = "Option::is_none")]
    pub float_y: Option<i64>,
    #[serde(rename = "floatw", skip_serializing_if = "Option::is_none")]
    pub float_w: Option<i64>,
    #[serde(rename = "floath", skip_serializing_if = "Option::is_none")]
    pub float_h: Option<i64>,
}

impl CardMetadata {
    /// Pretty JSON, two-space indented.
    pub fn to_block(&self) -> String {
        match serde_json::to_string_pretty(self) {
            Ok(block) => block,
            Err(e) => {
                log::error!("[inkcard.metadata] Failed to serialize metadata: {}", e);
                String::new()
            }
        }
    }

    fn set_geometry(&mut self, geometry: Option<FloatingGeometry>) {
        let g = geometry.map(FloatingGeometry::normalized);
        self.float_x = g.map(|g| g.left as i64);
        self.float_y = g.map(|g| g.top as i64);
        self.float_w = g.map(|g| g.width as i64);
        self.float_h = g.map(|g| g.height as i64);
    }
}

/// Requested change to the floating state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatingChange {
    Docked,
    /// Float the card, optionally at an explicit geometry.
    Floating(Option<FloatingGeometry>),
}

/// Field changes applied on top of the current metadata. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub color: Option<String>,
    pub pinned: Option<bool>,
    /// Raw tag editor text; normalized here.
    pub tags_line: Option<String>,
    pub images: Option<Vec<String>>,
    pub floating: Option<FloatingChange>,
}

/// Compute the next metadata from the current record and a patch.
///
/// `remembered` is the in-memory last-known panel geometry for the card.
/// Geometry priority: explicit patch, then `remembered`, then the persisted
/// fields.
pub fn build_metadata(
    current: &Map<String, Value>,
    patch: &MetadataPatch,
    remembered: Option<FloatingGeometry>,
) -> CardMetadata {
    let is_pinned = patch
        .pinned
        .unwrap_or_else(|| current.get("ispinned").and_then(Value::as_bool).unwrap_or(false));

    let color = patch
        .color
        .as_deref()
        .and_then(codec::normalize_hex_color)
        .or_else(|| codec::color_from_value(current.get("color")));

    let tag_tokens = match &patch.tags_line {
        Some(line) => tokens::extract_tag_tokens([line.as_str()]),
        None => tokens::tag_tokens_from_value(current.get("tags")),
    };

    let images = match &patch.images {
        Some(paths) => tokens::format_image_csv(paths),
        None => tokens::format_image_csv(&tokens::image_paths_from_value(current.get("images"))),
    };

    let mut metadata = CardMetadata {
        warning: METADATA_WARNING.to_string(),
        is_pinned,
        color,
        tags: tokens::format_tag_csv(&tag_tokens),
        images,
        is_floating: false,
        float_x: None,
        float_y: None,
        float_w: None,
        float_h: None,
    };

    let resolve = || remembered.or_else(|| codec::geometry_from_metadata(current));
    match patch.floating {
        Some(FloatingChange::Docked) => {}
        Some(FloatingChange::Floating(explicit)) => {
            metadata.is_floating = true;
            metadata.set_geometry(explicit.or_else(resolve));
        }
        None => {
            if matches!(current.get("isfloating"), Some(Value::Bool(true))) {
                metadata.is_floating = true;
                metadata.set_geometry(resolve());
            }
        }
    }
    metadata
}

/// Parse `current_body`, apply `patch`, return the serialized block.
pub fn build_metadata_block(
    current_body: Option<&str>,
    patch: &MetadataPatch,
    remembered: Option<FloatingGeometry>,
) -> String {
    let current = codec::parse_metadata_object(current_body);
    build_metadata(&current, patch, remembered).to_block()
}
