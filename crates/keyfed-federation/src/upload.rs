//! Publishing of locally submitted keys to the gateway.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use keyfed_observe::{EventPayload, Events};
use keyfed_types::{BatchTag, CandidatePosition, ExposureUploadCandidate};

use crate::client::InteropGatewayClient;
use crate::error::UploadError;
use crate::signing::PayloadSigner;
use crate::store::{Clock, ExecutionBudget, FederationStateStore, SubmissionSource};
use crate::types::ExposureUpload;
use crate::validation::check_key_data;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Region code attached to every exported key.
    pub region: String,
    /// Keys per upload call. `0` sends everything in one call.
    pub batch_size: usize,
    /// How far back the first ever upload reaches.
    pub initial_history_days: i64,
    /// Storage key prefixes marking keys that came from the gateway.
    pub federated_key_prefixes: Vec<String>,
    pub risk_level_default: Option<i32>,
    /// Minimum time that must remain before a chunk is started.
    pub min_remaining_time: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            region: "GB-EAW".to_string(),
            batch_size: 100,
            initial_history_days: 14,
            federated_key_prefixes: vec!["nearform".to_string()],
            risk_level_default: None,
            min_remaining_time: Duration::from_secs(30),
        }
    }
}

pub struct UploadPublishingPipeline {
    client: Arc<dyn InteropGatewayClient>,
    state: Arc<dyn FederationStateStore>,
    submissions: Arc<dyn SubmissionSource>,
    signer: Arc<dyn PayloadSigner>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn Events>,
    settings: UploadSettings,
}

impl UploadPublishingPipeline {
    pub fn new(
        client: Arc<dyn InteropGatewayClient>,
        state: Arc<dyn FederationStateStore>,
        submissions: Arc<dyn SubmissionSource>,
        signer: Arc<dyn PayloadSigner>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn Events>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            client,
            state,
            submissions,
            signer,
            clock,
            events,
            settings,
        }
    }

    /// Uploads pending candidates chunk by chunk and returns how many
    /// exposures were published.
    ///
    /// Before each chunk the remaining budget must cover both the configured
    /// minimum and the slowest chunk seen so far in this run; otherwise the
    /// run stops early and reports what it has done. The checkpoint moves
    /// past a chunk only once the gateway has accepted it.
    ///
    /// # Errors
    ///
    /// Returns `UploadError` if reading submissions, signing, the upload
    /// call or recording the checkpoint fails. Chunks accepted before the
    /// failure stay recorded.
    pub fn run(&self, budget: &dyn ExecutionBudget) -> Result<usize, UploadError> {
        let after = match self.state.upload_checkpoint()? {
            Some(position) => position,
            None => CandidatePosition::start_at(
                self.clock.now() - ChronoDuration::days(self.settings.initial_history_days),
            ),
        };

        let candidates = self.select(&after)?;
        tracing::info!(
            after = %after.submitted_at,
            candidates = candidates.len(),
            "starting key upload"
        );

        let chunk_size = if self.settings.batch_size == 0 {
            candidates.len().max(1)
        } else {
            self.settings.batch_size
        };

        let mut uploaded = 0;
        let mut batch_count = 0;
        let mut slowest = Duration::ZERO;

        for chunk in candidates.chunks(chunk_size) {
            let batch_number = batch_count + 1;
            let required = self.settings.min_remaining_time.max(slowest);
            let remaining = budget.remaining();
            if remaining < required {
                tracing::warn!(
                    remaining_ms = remaining.as_millis() as u64,
                    required_ms = required.as_millis() as u64,
                    batch_number,
                    "not enough time left for another upload batch"
                );
                self.events.emit(EventPayload::UploadBudgetExhausted {
                    remaining_ms: remaining.as_millis() as u64,
                    required_ms: required.as_millis() as u64,
                    batch_number,
                });
                break;
            }

            let started = self.clock.now();
            self.publish_chunk(chunk, batch_number)?;
            slowest = slowest.max(self.clock.elapsed_since(started));

            uploaded += chunk.len();
            batch_count = batch_number;
        }

        self.events.emit(EventPayload::UploadFinished {
            exposure_count: uploaded,
            batch_count,
        });
        Ok(uploaded)
    }

    /// Reads candidates after `after` and drops those that must not be sent.
    fn select(
        &self,
        after: &CandidatePosition,
    ) -> Result<Vec<ExposureUploadCandidate>, UploadError> {
        let mut candidates = self.submissions.pending_candidates(after)?;
        candidates.sort_by(|a, b| a.position.cmp(&b.position));

        let mut selected = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            if &candidate.position <= after {
                continue;
            }
            if self.is_federated(candidate.storage_key()) {
                self.events.emit(EventPayload::SelfExportExcluded {
                    storage_key: candidate.storage_key().to_string(),
                });
                continue;
            }
            if let Err(rejection) = check_key_data(&candidate.key.key) {
                self.events.emit(rejection.into_event());
                continue;
            }
            if let Some(level) = self.settings.risk_level_default {
                candidate.key.transmission_risk_level = level;
            }
            selected.push(candidate);
        }
        Ok(selected)
    }

    fn is_federated(&self, storage_key: &str) -> bool {
        self.settings
            .federated_key_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && storage_key.starts_with(prefix.as_str()))
    }

    fn publish_chunk(
        &self,
        chunk: &[ExposureUploadCandidate],
        batch_number: usize,
    ) -> Result<(), UploadError> {
        let Some(last) = chunk.last() else {
            return Ok(());
        };

        let exposures: Vec<ExposureUpload> = chunk
            .iter()
            .map(|c| ExposureUpload::from_candidate(c, &self.settings.region))
            .collect();
        let payload = serde_json::to_vec(&exposures)?;
        let signed = self.signer.sign(&payload)?;

        let batch_tag = BatchTag::generate();
        let response = self.client.upload_batch(&batch_tag, &signed)?;

        let inserted = response.inserted_exposures as usize;
        if inserted != chunk.len() {
            self.events.emit(EventPayload::DiagnosisKeysUploadIncomplete {
                sent: chunk.len(),
                inserted,
                batch_number,
            });
        }

        if let Err(e) = self.state.record_upload_state(&response) {
            tracing::warn!(error = %e, batch_number, "failed to record upload state");
        }
        self.state.set_upload_checkpoint(&last.position)?;

        let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        for candidate in chunk {
            *by_type.entry(candidate.test_type.as_str()).or_default() += 1;
        }
        for (test_type, exposure_count) in by_type {
            self.events.emit(EventPayload::UploadedDiagnosisKeys {
                test_type: test_type.to_string(),
                exposure_count,
                batch_number,
            });
        }

        tracing::info!(
            batch_number,
            batch_tag = %batch_tag,
            sent = chunk.len(),
            inserted,
            "uploaded diagnosis keys"
        );
        Ok(())
    }
}
