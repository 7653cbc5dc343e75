use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("No files have been uploaded yet")]
    NotUploaded,

    #[error("Upload folder is empty")]
    Empty,

    #[error("Staging IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file from the current batch, as found in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub filename: String,
    pub path: PathBuf,
}

/// The on-disk folder holding the most recently uploaded batch.
///
/// There is no locking: an upload clearing the folder while an extraction
/// is reading it is possible.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_exists(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Deletes every regular file in the folder. Individual failures are
    /// logged and skipped. Returns how many files were removed.
    pub async fn clear(&self) -> Result<usize, StagingError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.ensure_exists().await?;
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Error deleting file {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("🧹 Cleared {} staged file(s) from {}", removed, self.root.display());
        }
        Ok(removed)
    }

    /// Writes one file of the batch. `filename` must already be sanitized.
    pub async fn save(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StagingError> {
        self.ensure_exists().await?;
        let path = self.root.join(filename);
        tokio::fs::write(&path, data).await?;
        debug!("Staged {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }

    /// Regular files of the current batch, sorted by name.
    pub async fn list(&self) -> Result<Vec<StagedFile>, StagingError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StagingError::NotUploaded),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            files.push(StagedFile {
                filename: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
            });
        }

        if files.is_empty() {
            return Err(StagingError::Empty);
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    /// Number of staged files, zero when the folder is missing.
    pub async fn count(&self) -> usize {
        self.list().await.map(|files| files.len()).unwrap_or(0)
    }
}
