//! Gateway wire types that only the federation engine needs.

use keyfed_types::{BatchTag, ExposureUploadCandidate};
use serde::{Deserialize, Serialize};

/// One exported key as the gateway expects it in an upload payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureUpload {
    pub key_data: String,
    pub rolling_start_number: i64,
    pub transmission_risk_level: i32,
    pub rolling_period: i32,
    pub regions: Vec<String>,
    pub test_type: u8,
    pub report_type: u8,
    pub days_since_onset: i32,
}

impl ExposureUpload {
    pub fn from_candidate(candidate: &ExposureUploadCandidate, region: &str) -> Self {
        Self {
            key_data: candidate.key.key.clone(),
            rolling_start_number: candidate.key.rolling_start_number,
            transmission_risk_level: candidate.key.transmission_risk_level,
            rolling_period: candidate.key.rolling_period,
            regions: vec![region.to_string()],
            test_type: candidate.test_type.code(),
            report_type: candidate.report_type.code(),
            days_since_onset: candidate.days_since_onset,
        }
    }
}

/// Body of `POST /diagnosiskeys/upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisKeysUploadRequest {
    pub batch_tag: BatchTag,
    /// JWS compact serialization of the JSON exposure list.
    pub payload: String,
}
