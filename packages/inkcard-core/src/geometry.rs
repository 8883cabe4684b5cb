/// Floating panel geometry resolution.
///
/// When a floating panel materializes its geometry comes from, in order:
/// the in-memory position remembered from the last drag/resize, the
/// persisted metadata fields, or a cascaded default next to the list view.
/// Whatever wins is clamped so the panel stays on screen.
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::types::{round_px, FloatingGeometry, FLOATING_MIN_BODY_HEIGHT, FLOATING_MIN_WIDTH};

pub const VIEWPORT_MARGIN: f64 = 8.0;
pub const DEFAULT_FLOATING_WIDTH: f64 = 280.0;
/// Toolbar, tag row and image strip around the panel body.
pub const PANEL_CHROME_HEIGHT: f64 = 140.0;
pub const CASCADE_GAP: f64 = 12.0;
pub const CASCADE_STEP: f64 = 20.0;

/// Used when a card goes floating with no explicit or persisted geometry.
pub const FALLBACK_GEOMETRY: FloatingGeometry = FloatingGeometry {
    left: 24.0,
    top: 84.0,
    width: 360.0,
    height: 220.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

/// Layout inputs for panels with no remembered or persisted geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelDefaults {
    /// Top-left corner of the list view the panels cascade from.
    pub anchor_left: f64,
    pub anchor_top: f64,
    pub width: f64,
    pub body_height: f64,
}

impl Default for PanelDefaults {
    fn default() -> Self {
        Self {
            anchor_left: FALLBACK_GEOMETRY.left,
            anchor_top: FALLBACK_GEOMETRY.top,
            width: FALLBACK_GEOMETRY.width,
            body_height: FALLBACK_GEOMETRY.height,
        }
    }
}

fn clamp_axis(value: f64, extent: f64, viewport_extent: f64) -> f64 {
    let max = VIEWPORT_MARGIN.max(viewport_extent - extent - VIEWPORT_MARGIN);
    value.max(VIEWPORT_MARGIN).min(max)
}

/// Normalize `geometry` and keep the whole panel inside `viewport`.
/// Size is never reduced below the minimums, so on a tiny viewport the
/// panel is pinned to the top-left margin instead.
pub fn clamp_to_viewport(geometry: FloatingGeometry, viewport: Viewport) -> FloatingGeometry {
    let g = geometry.normalized();
    FloatingGeometry {
        left: clamp_axis(g.left, g.width, viewport.width),
        top: clamp_axis(g.top, g.height + PANEL_CHROME_HEIGHT, viewport.height),
        width: g.width,
        height: g.height,
    }
}

/// Cascaded default for the `index`-th floating panel: left of the anchor,
/// each panel a step lower than the previous.
pub fn cascade_geometry(defaults: &PanelDefaults, index: usize) -> FloatingGeometry {
    let width = round_px(defaults.width).max(FLOATING_MIN_WIDTH);
    FloatingGeometry {
        left: round_px(defaults.anchor_left - width - CASCADE_GAP),
        top: round_px(defaults.anchor_top + CASCADE_STEP * index as f64),
        width,
        height: round_px(defaults.body_height).max(FLOATING_MIN_BODY_HEIGHT),
    }
}

/// Geometry for a panel centered in the viewport. The full panel height is
/// estimated as body plus chrome.
pub fn centered_geometry(viewport: Viewport, width: f64, body_height: f64) -> FloatingGeometry {
    let width = round_px(width).max(FLOATING_MIN_WIDTH);
    let body_height = round_px(body_height).max(FLOATING_MIN_BODY_HEIGHT);
    let panel_height = body_height + PANEL_CHROME_HEIGHT;
    FloatingGeometry {
        left: clamp_axis(round_px((viewport.width - width) / 2.0), width, viewport.width),
        top: clamp_axis(round_px((viewport.height - panel_height) / 2.0), panel_height, viewport.height),
        width,
        height: body_height,
    }
}

/// Resolve the geometry of a materializing panel.
pub fn resolve_panel_geometry(
    remembered: Option<FloatingGeometry>,
    persisted: Option<FloatingGeometry>,
    defaults: &PanelDefaults,
    index: usize,
    viewport: Viewport,
) -> FloatingGeometry {
    let chosen = remembered
        .filter(FloatingGeometry::is_finite)
        .or_else(|| persisted.filter(FloatingGeometry::is_finite))
        .unwrap_or_else(|| cascade_geometry(defaults, index));
    clamp_to_viewport(chosen, viewport)
}

/// Last known geometry per card, kept for the lifetime of an engine session.
#[derive(Debug, Default)]
pub struct GeometryMemory {
    entries: RwLock<HashMap<String, FloatingGeometry>>,
}

impl GeometryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, id: &str, geometry: FloatingGeometry) {
        if !geometry.is_finite() {
            log::debug!("[inkcard.geometry] Ignoring non-finite geometry for {}", id);
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), geometry.normalized());
    }

    pub fn get(&self, id: &str) -> Option<FloatingGeometry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    /// Remove and return the remembered geometry; used when a panel
    /// materializes.
    pub fn take(&self, id: &str) -> Option<FloatingGeometry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn forget(&self, id: &str) {
        self.take(id);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
