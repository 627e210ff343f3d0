//! Locally submitted keys that are candidates for export to the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StoredExposureKey;

/// The kind of test behind a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestType {
    LabResult,
    RapidResult,
    RapidSelfReported,
}

impl TestType {
    /// Numeric code used on the gateway wire format.
    pub fn code(self) -> u8 {
        match self {
            Self::LabResult => 1,
            Self::RapidResult => 2,
            Self::RapidSelfReported => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LabResult => "LAB_RESULT",
            Self::RapidResult => "RAPID_RESULT",
            Self::RapidSelfReported => "RAPID_SELF_REPORTED",
        }
    }

    /// Infers the test type from a submission's storage key.
    ///
    /// Any path segment naming a test type selects it; keys without one are
    /// treated as lab results.
    pub fn from_storage_key(storage_key: &str) -> Self {
        storage_key
            .split('/')
            .find_map(|segment| match segment {
                "LAB_RESULT" => Some(Self::LabResult),
                "RAPID_RESULT" => Some(Self::RapidResult),
                "RAPID_SELF_REPORTED" => Some(Self::RapidSelfReported),
                _ => None,
            })
            .unwrap_or(Self::LabResult)
    }

    /// The report type the gateway expects alongside this test type.
    pub fn report_type(self) -> ReportType {
        match self {
            Self::LabResult => ReportType::ConfirmedTest,
            Self::RapidResult | Self::RapidSelfReported => ReportType::Unknown,
        }
    }
}

/// Report classification sent with each exported key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    Unknown,
    ConfirmedTest,
}

impl ReportType {
    pub fn code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::ConfirmedTest => 1,
        }
    }
}

/// Total order over upload candidates.
///
/// Ordering is by submission time, then storage key, then the key's index
/// inside its submission, so two candidates never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePosition {
    pub submitted_at: DateTime<Utc>,
    pub storage_key: String,
    pub key_index: u32,
}

impl CandidatePosition {
    /// A position that sorts before every candidate submitted at or after `ts`.
    pub fn start_at(ts: DateTime<Utc>) -> Self {
        Self {
            submitted_at: ts,
            storage_key: String::new(),
            key_index: 0,
        }
    }
}

/// A locally submitted key eligible for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureUploadCandidate {
    pub position: CandidatePosition,
    pub key: StoredExposureKey,
    pub test_type: TestType,
    pub report_type: ReportType,
    pub days_since_onset: i32,
}

impl ExposureUploadCandidate {
    /// Builds a candidate, deriving test and report type from the storage key.
    pub fn from_submission(
        storage_key: &str,
        submitted_at: DateTime<Utc>,
        key_index: u32,
        key: StoredExposureKey,
    ) -> Self {
        let test_type = TestType::from_storage_key(storage_key);
        let days_since_onset = key.days_since_onset.unwrap_or(0);
        Self {
            position: CandidatePosition {
                submitted_at,
                storage_key: storage_key.to_string(),
                key_index,
            },
            key,
            test_type,
            report_type: test_type.report_type(),
            days_since_onset,
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.position.storage_key
    }
}
