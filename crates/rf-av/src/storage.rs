//! Local filesystem [`Storage`] rooted at a directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use rf_core::{Error, Result};

use crate::traits::Storage;

/// Stores files under `root`. Keys may not escape the root.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open storage at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!("cannot create storage root {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "storage root {} is unavailable",
                self.root.display()
            )))
        }
    }
}

/// Reject empty, absolute and parent-relative keys.
fn check_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::Validation(format!("invalid storage key '{key}'")));
    }
    Ok(path)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save_file(&self, key: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.prepare_path(key).await?;
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.full_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found("file", key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_file(&self, key: &str) -> Result<bool> {
        let path = self.full_path(key)?;
        let result = match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        result?;
        Ok(true)
    }

    async fn file_exists(&self, key: &str) -> Result<bool> {
        let path = self.full_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get_file_size(&self, key: &str) -> Result<u64> {
        let path = self.full_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(md) => Ok(md.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found("file", key)),
            Err(e) => Err(e.into()),
        }
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(check_key(key)?))
    }

    async fn prepare_path(&self, key: &str) -> Result<PathBuf> {
        self.ensure_root()?;
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    async fn import_file(&self, source: &Path, key: &str) -> Result<u64> {
        let dest = self.prepare_path(key).await?;
        let size = tokio::fs::copy(source, &dest).await?;
        tracing::debug!(source = %source.display(), key, size, "Imported file into storage");
        Ok(size)
    }
}
