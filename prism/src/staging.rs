//! Staging area for payloads awaiting prediction.
//!
//! Model workers read images from a shared volume by a name derived from the
//! fingerprint alone: `<fingerprint><original extension>`.
//!
//! Uploads are streamed to a temporary file in the staging directory while
//! being fingerprinted, so no payload is ever held in memory whole. The
//! temporary file is renamed to its final name once the upload is accepted,
//! and removed if the upload is dropped first.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::fingerprint::{CHUNK_SIZE, Fingerprint, FingerprintHasher};

const INCOMING_PREFIX: &str = ".incoming-";

#[derive(Debug, thiserror::Error)]
#[error("Failed to stage {path}: {source}")]
pub struct StagingError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name a payload is staged under. Only the extension of the uploaded
    /// filename survives.
    pub fn staged_name(fingerprint: &Fingerprint, original_filename: &str) -> String {
        match Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
        {
            Some(ext) => format!("{fingerprint}.{ext}"),
            None => fingerprint.to_string(),
        }
    }

    /// Open a temporary file for an upload whose bytes are still arriving.
    pub async fn receive(
        &self,
        original_filename: impl Into<String>,
    ) -> Result<IncomingUpload, StagingError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError {
                path: self.dir.clone(),
                source,
            })?;

        let dir = self.dir.clone();
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(INCOMING_PREFIX)
                .tempfile_in(&dir)
        })
        .await
        .map_err(|e| StagingError {
            path: self.dir.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| StagingError {
            path: self.dir.clone(),
            source,
        })?;

        let (file, path) = temp.into_parts();
        Ok(IncomingUpload {
            filename: original_filename.into(),
            file: tokio::fs::File::from_std(file),
            path,
            hasher: FingerprintHasher::new(),
        })
    }

    /// Receive an in-memory payload through the same path as a streamed one.
    pub async fn receive_bytes(
        &self,
        original_filename: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Upload, StagingError> {
        let mut incoming = self.receive(original_filename).await?;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            incoming.write(chunk).await?;
        }
        incoming.finish().await
    }

    /// Move an accepted upload to its fingerprint-derived name and return
    /// that name. An existing file with the same name is replaced.
    pub async fn commit(&self, upload: Upload) -> Result<String, StagingError> {
        let name = Self::staged_name(&upload.fingerprint, &upload.filename);
        let path = self.dir.join(&name);

        tokio::fs::rename(&upload.path, &path)
            .await
            .map_err(|source| StagingError {
                path: path.clone(),
                source,
            })?;
        // The temporary name no longer exists; stop the drop guard from
        // chasing it.
        let _ = upload.path.keep();

        tracing::debug!(path = %path.display(), "Staged payload");
        Ok(name)
    }
}

/// An upload being written to the staging directory chunk by chunk.
#[derive(Debug)]
pub struct IncomingUpload {
    filename: String,
    file: tokio::fs::File,
    path: TempPath,
    hasher: FingerprintHasher,
}

impl IncomingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StagingError> {
        self.hasher.update(chunk);
        self.file
            .write_all(chunk)
            .await
            .map_err(|source| StagingError {
                path: self.path.to_path_buf(),
                source,
            })
    }

    /// Flush the temporary file and seal the fingerprint.
    pub async fn finish(mut self) -> Result<Upload, StagingError> {
        self.file.flush().await.map_err(|source| StagingError {
            path: self.path.to_path_buf(),
            source,
        })?;
        drop(self.file);

        let size = self.hasher.len();
        let fingerprint = self.hasher.finish();
        tracing::debug!(
            fingerprint = %fingerprint,
            filename = %self.filename,
            size,
            "Received upload"
        );

        Ok(Upload {
            filename: self.filename,
            fingerprint,
            size,
            path: self.path,
        })
    }
}

/// A fully received upload, fingerprinted and parked in the staging
/// directory under a temporary name. Dropping it removes the file.
#[derive(Debug)]
pub struct Upload {
    filename: String,
    fingerprint: Fingerprint,
    size: u64,
    path: TempPath,
}

impl Upload {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Where the payload sits until it is committed.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
