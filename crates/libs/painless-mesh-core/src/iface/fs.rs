//! Persistence boundary for the offline queue (spec §4.N). Grounded on
//! this teacher crate's `storage::Store` trait, which keeps the on-disk
//! format decision (JSON Lines, one record per line) out of the code that
//! decides *what* to persist.

use async_trait::async_trait;

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Replaces the file's contents wholesale. `contents` is already
    /// newline-delimited JSON; this trait does not interpret it.
    async fn write_all(&self, contents: &[u8]) -> std::io::Result<()>;

    /// Returns `Ok(None)` if the file does not exist yet (first boot).
    async fn read_all(&self) -> std::io::Result<Option<Vec<u8>>>;
}

/// [`FileStore`] backed by a real file on disk via `tokio::fs`.
pub struct TokioFileStore {
    path: std::path::PathBuf,
}

impl TokioFileStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        TokioFileStore { path: path.into() }
    }
}

#[async_trait]
impl FileStore for TokioFileStore {
    async fn write_all(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.path).await
    }

    async fn read_all(&self) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
