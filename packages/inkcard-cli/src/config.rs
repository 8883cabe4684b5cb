/// Config file location and `init`.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use inkcard_core::config::{load_config, save_config};

/// Default config path: ~/.config/inkcard/config.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inkcard")
        .join("config.json")
}

/// Create `folder` and record it in the config at `path`, keeping any other
/// settings already there.
pub fn init(path: &Path, folder: &Path) -> Result<()> {
    fs::create_dir_all(folder).with_context(|| format!("creating {}", folder.display()))?;
    let folder = fs::canonicalize(folder).with_context(|| format!("resolving {}", folder.display()))?;
    let mut config = load_config(path);
    config.folder = Some(folder.clone());
    save_config(path, &config).with_context(|| format!("writing {}", path.display()))?;
    println!("Cards folder set to {}", folder.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_keeps_other_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"file_prefix": "Note", "debounce_ms": 500}"#).unwrap();
        let folder = dir.path().join("cards");

        init(&path, &folder).unwrap();
        let config = load_config(&path);
        assert!(folder.is_dir());
        assert_eq!(config.folder, Some(fs::canonicalize(&folder).unwrap()));
        assert_eq!(config.file_prefix, "Note");
        assert_eq!(config.debounce_ms, 500);
    }
}
