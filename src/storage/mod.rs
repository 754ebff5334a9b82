//! Storage backend for raw data item bytes

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncRead;
use url::Url;

/// Boxed async byte stream returned by [`StorageBackend::open`]
pub type ByteReader = Pin<Box<dyn AsyncRead + Send + Sync>>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Size in bytes of the object at `location`
    async fn get_size(&self, location: &str) -> Result<u64>;

    /// Open the object at `location` for streaming reads
    async fn open(&self, location: &str) -> Result<ByteReader>;
}

/// Local filesystem storage
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a `file://` URI, absolute path, or root-relative path
    pub fn resolve(&self, location: &str) -> Result<PathBuf> {
        if location.starts_with("file://") {
            let url = Url::parse(location)?;
            return url
                .to_file_path()
                .map_err(|_| Error::Storage(format!("not a local file URI: {}", location)));
        }

        if location.contains("://") {
            return Err(Error::Storage(format!(
                "unsupported storage location: {}",
                location
            )));
        }

        let path = Path::new(location);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn get_size(&self, location: &str) -> Result<u64> {
        let path = self.resolve(location)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(metadata.len())
    }

    async fn open(&self, location: &str) -> Result<ByteReader> {
        let path = self.resolve(location)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(Box::pin(file))
    }
}
