//! Shared data model for the diagnosis key federation connector.
//!
//! This crate holds the types exchanged between the federation gateway, the
//! local blob store, the persisted cursor and the upload pipeline, together
//! with the exposure-notification interval arithmetic every validation rule
//! depends on.
//!
//! Nothing here performs I/O. Keeping the model free of transport and storage
//! concerns lets every other crate in the workspace depend on it without
//! pulling in HTTP or SQLite.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod interval;
pub mod submission;

pub use interval::{
    interval_number, INTERVAL_SECONDS, KEY_LENGTH, MAX_ROLLING_PERIOD,
    MAX_TRANSMISSION_RISK_LEVEL, RETENTION_DAYS,
};
pub use submission::{CandidatePosition, ExposureUploadCandidate, ReportType, TestType};

/// Opaque pagination token assigned by the federation gateway.
///
/// Also used as the identifier of an uploaded batch, in which case it is
/// generated locally with [`BatchTag::generate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchTag(String);

impl BatchTag {
    /// Wraps a gateway-provided token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random batch identifier for an upload.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty tag signals the end of pagination.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for BatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A diagnosis key as delivered by the federation gateway.
///
/// The gateway may omit `origin`; in that case the first entry of `regions`
/// identifies the submitting backend (see [`RawExposureKey::effective_origin`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExposureKey {
    /// Base64-encoded key material.
    pub key_data: String,
    /// Start of validity, in 10-minute intervals since the Unix epoch.
    pub rolling_start_number: i64,
    /// Transmission risk score, `0..=8`.
    pub transmission_risk_level: i32,
    /// Number of intervals the key is valid for.
    pub rolling_period: i32,
    /// Country/region code of the backend that submitted the key.
    #[serde(default)]
    pub origin: String,
    /// Country/region codes the key is relevant to.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Gateway test type code. Payloads without one are lab results.
    #[serde(default = "lab_result_code")]
    pub test_type: u8,
    /// Gateway report type code. Payloads without one are confirmed tests.
    #[serde(default = "confirmed_test_code")]
    pub report_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_onset: Option<i32>,
}

fn lab_result_code() -> u8 {
    TestType::LabResult.code()
}

fn confirmed_test_code() -> u8 {
    ReportType::ConfirmedTest.code()
}

impl RawExposureKey {
    /// Returns the origin used to partition local storage.
    ///
    /// Falls back to the first region when the gateway did not send an
    /// explicit origin. Returns `None` when neither is present.
    pub fn effective_origin(&self) -> Option<&str> {
        let origin = self.origin.trim();
        if !origin.is_empty() {
            return Some(origin);
        }
        self.regions
            .first()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
    }

    /// Whether the key comes from a lab result confirmed by a test.
    /// Only these are stored locally.
    pub fn is_confirmed_lab_result(&self) -> bool {
        self.test_type == TestType::LabResult.code()
            && self.report_type == ReportType::ConfirmedTest.code()
    }

    /// Converts to the canonical stored form, dropping origin, regions and
    /// test metadata.
    pub fn to_stored(&self) -> StoredExposureKey {
        StoredExposureKey {
            key: self.key_data.clone(),
            rolling_start_number: self.rolling_start_number,
            rolling_period: self.rolling_period,
            transmission_risk_level: self.transmission_risk_level,
            days_since_onset: self.days_since_onset,
        }
    }
}

/// The canonical persisted form of a diagnosis key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredExposureKey {
    /// Base64-encoded key material.
    pub key: String,
    pub rolling_start_number: i64,
    pub rolling_period: i32,
    pub transmission_risk_level: i32,
    /// Only present on locally submitted keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_onset: Option<i32>,
}

/// Body of one stored object: `{"temporaryExposureKeys": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeyPayload {
    pub temporary_exposure_keys: Vec<StoredExposureKey>,
}

/// One page of the gateway's download pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub batch_tag: BatchTag,
    #[serde(rename = "exposures", default)]
    pub keys: Vec<RawExposureKey>,
}

/// The last successfully ingested batch tag and the date it was ingested on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub batch_tag: BatchTag,
    pub batch_date: NaiveDate,
}

/// Diagnostic snapshot of the most recent successful upload call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    pub batch_tag: BatchTag,
    pub inserted_exposures: u32,
}

/// Formats a date as used in local object keys (`yyyyMMdd`).
pub fn object_key_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Formats a date as used in gateway download URLs (`yyyy-MM-dd`).
pub fn gateway_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
