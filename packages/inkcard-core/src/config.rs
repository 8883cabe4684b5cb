/// Collection configuration, stored as JSON.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::query::SortMode;
use crate::types::CARD_COLORS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Folder holding the card documents.
    #[serde(default)]
    pub folder: Option<PathBuf>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub auto_expand_images: bool,
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
    #[serde(default)]
    pub sort: SortMode,
    #[serde(default = "default_palette")]
    pub palette: Vec<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_preview_lines() -> usize {
    3
}

fn default_palette() -> Vec<String> {
    CARD_COLORS.iter().map(|c| c.to_string()).collect()
}

fn default_file_prefix() -> String {
    "Idea".to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            folder: None,
            debounce_ms: default_debounce_ms(),
            auto_expand_images: false,
            preview_lines: default_preview_lines(),
            sort: SortMode::default(),
            palette: default_palette(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl CollectionConfig {
    pub fn with_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: Some(folder.into()),
            ..Self::default()
        }
    }
}

/// Load config from path. Returns the default if the file doesn't exist or
/// doesn't parse.
pub fn load_config(path: &Path) -> CollectionConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("[inkcard.config] Failed to parse config {}: {}", path.display(), e);
            CollectionConfig::default()
        }),
        Err(_) => {
            log::info!("[inkcard.config] No config at {}, using defaults", path.display());
            CollectionConfig::default()
        }
    }
}

/// Write config as pretty JSON, creating the parent directory.
pub fn save_config(path: &Path, config: &CollectionConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
