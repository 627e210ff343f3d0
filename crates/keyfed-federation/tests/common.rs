//! Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use keyfed_federation::{
    Clock, DownloadOutcome, EmptyReason, InteropError, InteropGatewayClient,
};
use keyfed_types::{interval_number, BatchTag, Page, RawExposureKey, UploadState};

pub const VALID_KEY: &str = "W2zb3BeMWt6Xr2u0ABG32Q==";
pub const OVERSIZED_KEY: &str = "W2zb3BeMWt6Xr2u0ABG32W2zb3BeMWt6Xr2u0ABG32Q==";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 9, 15, 12, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Clock that moves forward by `step` every time it is read.
pub struct SteppingClock {
    current: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap();
        let read = *current;
        *current = read + self.step;
        read
    }
}

pub fn raw_key(origin: &str, key_data: &str, started: DateTime<Utc>) -> RawExposureKey {
    RawExposureKey {
        key_data: key_data.to_string(),
        rolling_start_number: interval_number(started),
        transmission_risk_level: 3,
        rolling_period: 144,
        origin: origin.to_string(),
        regions: vec![origin.to_string()],
        test_type: 1,
        report_type: 1,
        days_since_onset: None,
    }
}

pub fn page(tag: &str, keys: Vec<RawExposureKey>) -> Page {
    Page {
        batch_tag: BatchTag::new(tag),
        keys,
    }
}

/// Gateway double that serves pages keyed by the requested batch tag and
/// records every call.
#[derive(Default)]
pub struct ScriptedGateway {
    pages: HashMap<Option<String>, DownloadOutcome>,
    pub downloads: Mutex<Vec<(NaiveDate, Option<String>)>>,
    pub uploads: Mutex<Vec<(BatchTag, String)>>,
    upload_failure_on_call: Option<usize>,
    inserted_override: Option<u32>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `outcome` when asked for the page after `after`.
    pub fn serve(mut self, after: Option<&str>, outcome: DownloadOutcome) -> Self {
        self.pages.insert(after.map(str::to_string), outcome);
        self
    }

    pub fn serve_page(self, after: Option<&str>, page: Page) -> Self {
        self.serve(after, DownloadOutcome::Batch(page))
    }

    /// Fails the n-th upload call (1-based) with a 503.
    pub fn fail_upload_on_call(mut self, n: usize) -> Self {
        self.upload_failure_on_call = Some(n);
        self
    }

    pub fn report_inserted(mut self, inserted: u32) -> Self {
        self.inserted_override = Some(inserted);
        self
    }

    pub fn download_tags(&self) -> Vec<Option<String>> {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn uploaded_payloads(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl InteropGatewayClient for ScriptedGateway {
    fn download_page(&self, date: NaiveDate, batch_tag: Option<&BatchTag>) -> DownloadOutcome {
        let tag = batch_tag.map(|t| t.as_str().to_string());
        self.downloads.lock().unwrap().push((date, tag.clone()));
        self.pages
            .get(&tag)
            .cloned()
            .unwrap_or(DownloadOutcome::Empty(EmptyReason::NoContent))
    }

    fn upload_batch(
        &self,
        batch_tag: &BatchTag,
        signed_payload: &str,
    ) -> Result<UploadState, InteropError> {
        let mut uploads = self.uploads.lock().unwrap();
        if self.upload_failure_on_call == Some(uploads.len() + 1) {
            return Err(InteropError::UnexpectedStatus {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        uploads.push((batch_tag.clone(), signed_payload.to_string()));

        let sent = decode_payload(signed_payload).len() as u32;
        Ok(UploadState {
            batch_tag: batch_tag.clone(),
            inserted_exposures: self.inserted_override.unwrap_or(sent),
        })
    }
}

/// Extracts the exposure list from a JWS compact serialization without
/// verifying it.
pub fn decode_payload(token: &str) -> Vec<serde_json::Value> {
    use base64::Engine as _;
    let payload = token.split('.').nth(1).unwrap();
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
