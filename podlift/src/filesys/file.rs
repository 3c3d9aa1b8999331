//! File operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::DeployError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Size in bytes
    pub async fn size(&self) -> Result<u64, DeployError> {
        Ok(fs::metadata(&self.path).await?.len())
    }

    pub async fn read_string(&self) -> Result<String, DeployError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Whether the file starts with `prefix`
    pub async fn starts_with(&self, prefix: &[u8]) -> Result<bool, DeployError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut head = vec![0u8; prefix.len()];
        match file.read_exact(&mut head).await {
            Ok(_) => Ok(head == prefix),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write string to file, creating parent directories
    pub async fn write_string(&self, contents: &str) -> Result<(), DeployError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Copy to `dest`, overwriting it
    pub async fn copy_to(&self, dest: &Path) -> Result<u64, DeployError> {
        Ok(fs::copy(&self.path, dest).await?)
    }

    /// Path of the single backup slot
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Copy into the `.bak` slot, replacing any previous backup
    pub async fn backup(&self) -> Result<PathBuf, DeployError> {
        let backup = self.backup_path();
        self.copy_to(&backup).await?;
        Ok(backup)
    }

    /// Atomically move this file over `dest`; both must be on one filesystem
    pub async fn replace(&self, dest: &Path) -> Result<(), DeployError> {
        fs::rename(&self.path, dest).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), DeployError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}
