//! Content store for downloaded image bytes

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Blob storage keyed by file name.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> io::Result<()>;

    async fn read(&self, file_name: &str) -> io::Result<Vec<u8>>;
}

/// Stores every file flat under one directory, created on first write.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file_name: &str) -> io::Result<PathBuf> {
        let name = Path::new(file_name);
        // Only bare file names; no separators or parent components.
        if file_name.is_empty() || name.file_name().map(|n| n != name.as_os_str()).unwrap_or(true) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name: {file_name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(file_name)?;
        fs::create_dir_all(&self.root).await?;
        fs::write(&path, bytes).await?;
        debug!("💾 Stored {} bytes at {:?}", bytes.len(), path);
        Ok(())
    }

    async fn read(&self, file_name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(file_name)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_creates_directory_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path().join("images"));

        store.save("page-abc.jpg", b"jpeg bytes").await.unwrap();

        assert!(dir.path().join("images").join("page-abc.jpg").exists());
        assert_eq!(store.read("page-abc.jpg").await.unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn rejects_names_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        for name in ["../evil.jpg", "nested/page.jpg", ""] {
            let err = store.save(name, b"x").await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name}");
        }
    }
}
