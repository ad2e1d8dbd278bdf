//! Path resolution utilities.

use crate::env;
use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the pixelbridge base directory (`$PIXELBRIDGE_HOME` or `~/.pixelbridge`).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    if let Some(home) = env::get_var(env::vars::PIXELBRIDGE_HOME) {
        return Ok(expand_tilde(&home));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".pixelbridge"))
}

/// Get the main config file path (`$PIXELBRIDGE_CONFIG` or `~/.pixelbridge/pixelbridge.json5`).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env::get_var(env::vars::PIXELBRIDGE_CONFIG) {
        return Ok(expand_tilde(&path));
    }
    Ok(base_dir()?.join("pixelbridge.json5"))
}

/// Get the default layout file path (~/.pixelbridge/layout.json).
pub fn layout_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("layout.json"))
}

/// Ensure the base directory exists.
pub fn ensure_dirs() -> Result<(), ConfigError> {
    std::fs::create_dir_all(base_dir()?)?;
    Ok(())
}

/// Expand tilde (~) in a path.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/test");
        assert!(!expanded.to_string_lossy().contains('~'));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_layout_file_under_base() {
        let base = base_dir().unwrap();
        assert!(layout_file().unwrap().starts_with(base));
    }
}
