//! Ingestion of gateway pages into the local blob store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use keyfed_observe::{EventPayload, Events};
use keyfed_types::{object_key_date, BatchTag, Cursor, Page, StoredExposureKey, StoredKeyPayload};

use crate::client::{EmptyReason, InteropGatewayClient, Pages};
use crate::error::DownloadError;
use crate::store::{BlobStore, Clock, ExecutionBudget, FederationStateStore};
use crate::validation::KeyValidator;

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// First segment of every stored object key.
    pub key_prefix: String,
    /// How far back the first ever download starts.
    pub initial_history_days: u64,
    /// Upper bound on pages fetched per run.
    pub max_batch_count: usize,
    /// Replaces every downloaded key's transmission risk level when set.
    pub risk_level_default: Option<i32>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            key_prefix: "nearform".to_string(),
            initial_history_days: 14,
            max_batch_count: 100,
            risk_level_default: None,
        }
    }
}

pub struct DownloadIngestionPipeline {
    client: Arc<dyn InteropGatewayClient>,
    state: Arc<dyn FederationStateStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn Events>,
    validator: KeyValidator,
    settings: DownloadSettings,
}

impl DownloadIngestionPipeline {
    pub fn new(
        client: Arc<dyn InteropGatewayClient>,
        state: Arc<dyn FederationStateStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn Events>,
        validator: KeyValidator,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            client,
            state,
            blobs,
            clock,
            events,
            validator,
            settings,
        }
    }

    /// Pulls every page newer than the stored cursor and returns how many
    /// were ingested.
    ///
    /// The cursor moves to a page's batch tag only after every origin group
    /// of that page has been written. A failed write stops the run with the
    /// cursor still on the previous page.
    ///
    /// After each page the slowest page time seen so far is compared with
    /// `budget`; once it no longer fits, the run stops and the remaining
    /// pages are left for the next run.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on a blob write failure, a cursor read/write
    /// failure (including a conflicting concurrent run) or a serialization
    /// failure. Gateway unavailability is not an error.
    pub fn run(
        &self,
        as_of: NaiveDate,
        budget: &dyn ExecutionBudget,
    ) -> Result<usize, DownloadError> {
        let cursor = self.state.cursor()?;
        let date = match &cursor {
            Some(cursor) => cursor.batch_date,
            None => as_of
                .checked_sub_days(Days::new(self.settings.initial_history_days))
                .unwrap_or(as_of),
        };
        let mut expected = cursor.map(|c| c.batch_tag);

        tracing::info!(
            date = %date,
            batch_tag = expected.as_ref().map(BatchTag::as_str),
            "starting key download"
        );

        let mut pages = Pages::new(self.client.as_ref(), date, expected.clone());
        let mut batch_count = 0;
        let mut slowest = Duration::ZERO;
        let mut out_of_time = false;

        while batch_count < self.settings.max_batch_count {
            let started = self.clock.now();
            let Some(mut page) = pages.next() else {
                break;
            };
            batch_count += 1;
            self.events.emit(EventPayload::DownloadedExposures {
                batch_tag: page.batch_tag.to_string(),
                exposure_count: page.keys.len(),
                batch_number: batch_count,
            });

            if let Some(level) = self.settings.risk_level_default {
                for key in &mut page.keys {
                    key.transmission_risk_level = level;
                }
            }

            self.store_page(&page, as_of)?;

            let next = Cursor {
                batch_tag: page.batch_tag.clone(),
                batch_date: as_of,
            };
            self.state.advance_cursor(expected.as_ref(), &next)?;
            expected = Some(next.batch_tag);

            slowest = slowest.max(self.clock.elapsed_since(started));
            let remaining = budget.remaining();
            if slowest >= remaining {
                tracing::warn!(
                    remaining_ms = remaining.as_millis() as u64,
                    slowest_ms = slowest.as_millis() as u64,
                    batch_count,
                    "not enough time left for another page, remaining pages deferred to next run"
                );
                out_of_time = true;
                break;
            }
        }

        match pages.end_reason() {
            Some(EmptyReason::NoContent) => {
                tracing::debug!(date = %date, "gateway has no further pages");
            }
            Some(EmptyReason::Failed(reason)) => {
                self.events.emit(EventPayload::DownloadPageUnavailable {
                    date: date.to_string(),
                    batch_tag: pages.next_tag().map(BatchTag::to_string),
                    reason: reason.clone(),
                });
            }
            None if out_of_time => {}
            None => {
                tracing::warn!(
                    max_batch_count = self.settings.max_batch_count,
                    "page cap reached, remaining pages deferred to next run"
                );
            }
        }

        self.events.emit(EventPayload::DownloadFinished { batch_count });
        Ok(batch_count)
    }

    fn store_page(&self, page: &Page, as_of: NaiveDate) -> Result<(), DownloadError> {
        if !is_key_segment(page.batch_tag.as_str()) {
            tracing::warn!(
                batch_tag = %page.batch_tag,
                "batch tag cannot name a stored object, page skipped"
            );
            return Ok(());
        }

        let groups = self.validator.group(page, self.clock.now(), self.events.as_ref());
        for (origin, keys) in groups {
            if !is_key_segment(&origin) {
                self.events.emit(EventPayload::InvalidOriginKeys {
                    origin,
                    batch_tag: page.batch_tag.to_string(),
                });
                continue;
            }
            let key = self.object_key(&origin, as_of, &page.batch_tag);
            let body = serde_json::to_vec(&stored_payload(keys))?;
            self.blobs.put(&key, &body)?;
            tracing::debug!(object_key = %key, "stored federated keys");
        }
        Ok(())
    }

    fn object_key(&self, origin: &str, date: NaiveDate, batch_tag: &BatchTag) -> String {
        format!(
            "{}/{}/{}/{}.json",
            self.settings.key_prefix,
            origin,
            object_key_date(date),
            batch_tag
        )
    }
}

/// Whether `value` can stand as one `/`-separated object key segment.
fn is_key_segment(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\'])
}

fn stored_payload(keys: Vec<StoredExposureKey>) -> StoredKeyPayload {
    StoredKeyPayload {
        temporary_exposure_keys: keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_segments_reject_path_syntax() {
        assert!(is_key_segment("NI"));
        assert!(is_key_segment("75b326f7-ae6f-42f6-9354-00c0a6b797b3"));
        assert!(is_key_segment("a..b"));
        for bad in ["", ".", "..", "../escape", "NI/extra", "a\\b"] {
            assert!(!is_key_segment(bad), "{bad:?} accepted");
        }
    }
}
