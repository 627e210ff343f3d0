//! Directory-backed blob store and submission source.
//!
//! Object keys map to paths relative to a root directory, with `/` as the
//! separator on every platform.

use std::fs;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use keyfed_federation::{BlobStore, StorageError, SubmissionSource};
use keyfed_types::{CandidatePosition, ExposureUploadCandidate, StoredKeyPayload};

/// Writes each object to `<root>/<key>`, replacing it atomically.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StorageError::Backend(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(body)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &path)?;

        tracing::debug!(key, bytes = body.len(), "stored object");
        Ok(())
    }
}

/// Reads submitted key files (`*.json` holding a [`StoredKeyPayload`]) from
/// a directory tree.
///
/// A file's storage key is its path relative to the root and its submission
/// time is its modification time.
#[derive(Debug, Clone)]
pub struct FilesystemSubmissionSource {
    root: PathBuf,
}

impl FilesystemSubmissionSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_files(&path, out)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                out.push(path);
            }
        }
        Ok(())
    }

    fn storage_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(segments.join("/"))
    }
}

impl SubmissionSource for FilesystemSubmissionSource {
    fn pending_candidates(
        &self,
        after: &CandidatePosition,
    ) -> Result<Vec<ExposureUploadCandidate>, StorageError> {
        if !self.root.exists() {
            tracing::debug!(root = %self.root.display(), "submission root missing, nothing to export");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        self.collect_files(&self.root, &mut files)?;

        let mut candidates = Vec::new();
        for path in files {
            let Some(storage_key) = self.storage_key(&path) else {
                tracing::warn!(path = %path.display(), "skipping submission with non UTF-8 path");
                continue;
            };
            let submitted_at: DateTime<Utc> = fs::metadata(&path)?.modified()?.into();
            if submitted_at < after.submitted_at {
                continue;
            }

            let payload: StoredKeyPayload = match serde_json::from_slice(&fs::read(&path)?) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(storage_key, error = %e, "skipping unreadable submission");
                    continue;
                }
            };

            candidates.extend(
                payload
                    .temporary_exposure_keys
                    .into_iter()
                    .enumerate()
                    .map(|(index, key)| {
                        ExposureUploadCandidate::from_submission(
                            &storage_key,
                            submitted_at,
                            index as u32,
                            key,
                        )
                    })
                    .filter(|c| &c.position > after),
            );
        }

        candidates.sort_by(|a, b| a.position.cmp(&b.position));
        Ok(candidates)
    }
}
