//! Collaborator interfaces consumed by the pipelines.

use std::time::Duration;

use chrono::{DateTime, Utc};
use keyfed_types::{BatchTag, CandidatePosition, Cursor, ExposureUploadCandidate, UploadState};

use crate::error::{StorageError, StoreError};

/// Persisted download cursor, upload checkpoint and last upload response.
pub trait FederationStateStore: Send + Sync {
    fn cursor(&self) -> Result<Option<Cursor>, StoreError>;

    /// Replaces the cursor if its current batch tag is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` without writing when another writer
    /// moved the cursor since it was read.
    fn advance_cursor(&self, expected: Option<&BatchTag>, next: &Cursor) -> Result<(), StoreError>;

    fn upload_state(&self) -> Result<Option<UploadState>, StoreError>;

    fn record_upload_state(&self, state: &UploadState) -> Result<(), StoreError>;

    fn upload_checkpoint(&self) -> Result<Option<CandidatePosition>, StoreError>;

    fn set_upload_checkpoint(&self, position: &CandidatePosition) -> Result<(), StoreError>;
}

/// Object storage for downloaded key groups.
pub trait BlobStore: Send + Sync {
    /// Writes `body` under `key`, replacing any previous object.
    fn put(&self, key: &str, body: &[u8]) -> Result<(), StorageError>;
}

/// Locally submitted keys awaiting export.
pub trait SubmissionSource: Send + Sync {
    /// Returns candidates positioned strictly after `after`, in position order.
    fn pending_candidates(
        &self,
        after: &CandidatePosition,
    ) -> Result<Vec<ExposureUploadCandidate>, StorageError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time since `started` on this clock, zero if the clock went backwards.
    fn elapsed_since(&self, started: DateTime<Utc>) -> Duration {
        (self.now() - started).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time left before the host environment stops this invocation.
pub trait ExecutionBudget {
    fn remaining(&self) -> Duration;
}
