//! Asset catalog and layout sources.
//!
//! Both are optional. A missing file is not an error; observers fall back
//! to an empty catalog or the built-in layout.

use crate::error::ServerError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplies the sprite/asset catalog.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Load the catalog, or `None` if unavailable.
    async fn load_catalog(&self) -> Result<Option<Value>>;
}

/// Persists the observer layout.
#[async_trait]
pub trait LayoutStore: Send + Sync {
    /// Last saved layout, or `None` for the default.
    async fn load_layout(&self) -> Result<Option<Value>>;

    /// Replace the saved layout.
    async fn save_layout(&self, layout: &Value) -> Result<()>;
}

/// No catalog and no persisted layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssets;

#[async_trait]
impl AssetSource for NoAssets {
    async fn load_catalog(&self) -> Result<Option<Value>> {
        Ok(None)
    }
}

#[async_trait]
impl LayoutStore for NoAssets {
    async fn load_layout(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn save_layout(&self, _layout: &Value) -> Result<()> {
        Ok(())
    }
}

/// Catalog read from a JSON file.
#[derive(Debug, Clone)]
pub struct FileAssetSource {
    path: PathBuf,
}

impl FileAssetSource {
    /// Read the catalog from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AssetSource for FileAssetSource {
    async fn load_catalog(&self) -> Result<Option<Value>> {
        read_json(&self.path).await
    }
}

/// Layout kept in a JSON file.
#[derive(Debug, Clone)]
pub struct FileLayoutStore {
    path: PathBuf,
}

impl FileLayoutStore {
    /// Store the layout at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LayoutStore for FileLayoutStore {
    async fn load_layout(&self) -> Result<Option<Value>> {
        read_json(&self.path).await
    }

    async fn save_layout(&self, layout: &Value) -> Result<()> {
        let content = serde_json::to_string_pretty(layout)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), "layout saved");
        Ok(())
    }
}

async fn read_json(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ServerError::Asset(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no file, using default");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
