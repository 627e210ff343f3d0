//! In-memory collaborators for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyfed_types::{BatchTag, CandidatePosition, Cursor, ExposureUploadCandidate, UploadState};

use crate::error::{StorageError, StoreError};
use crate::store::{BlobStore, Clock, ExecutionBudget, FederationStateStore, SubmissionSource};

#[derive(Debug, Default)]
struct State {
    cursor: Option<Cursor>,
    upload_state: Option<UploadState>,
    checkpoint: Option<CandidatePosition>,
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<State>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: Cursor) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.cursor = Some(cursor);
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl FederationStateStore for InMemoryStateStore {
    fn cursor(&self) -> Result<Option<Cursor>, StoreError> {
        Ok(self.lock()?.cursor.clone())
    }

    fn advance_cursor(&self, expected: Option<&BatchTag>, next: &Cursor) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let found = state.cursor.as_ref().map(|c| c.batch_tag.clone());
        if found.as_ref() != expected {
            return Err(StoreError::Conflict {
                expected: expected.cloned(),
                found,
            });
        }
        state.cursor = Some(next.clone());
        Ok(())
    }

    fn upload_state(&self) -> Result<Option<UploadState>, StoreError> {
        Ok(self.lock()?.upload_state.clone())
    }

    fn record_upload_state(&self, upload_state: &UploadState) -> Result<(), StoreError> {
        self.lock()?.upload_state = Some(upload_state.clone());
        Ok(())
    }

    fn upload_checkpoint(&self) -> Result<Option<CandidatePosition>, StoreError> {
        Ok(self.lock()?.checkpoint.clone())
    }

    fn set_upload_checkpoint(&self, position: &CandidatePosition) -> Result<(), StoreError> {
        self.lock()?.checkpoint = Some(position.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Backend("blob store lock poisoned".to_string()))?;
        objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubmissionSource {
    candidates: Vec<ExposureUploadCandidate>,
}

impl InMemorySubmissionSource {
    pub fn new(mut candidates: Vec<ExposureUploadCandidate>) -> Self {
        candidates.sort_by(|a, b| a.position.cmp(&b.position));
        Self { candidates }
    }
}

impl SubmissionSource for InMemorySubmissionSource {
    fn pending_candidates(
        &self,
        after: &CandidatePosition,
    ) -> Result<Vec<ExposureUploadCandidate>, StorageError> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| &c.position > after)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBudget(pub Duration);

impl ExecutionBudget for FixedBudget {
    fn remaining(&self) -> Duration {
        self.0
    }
}
