//! Event domain, payload, and record types for the federation event log.

use serde::{Deserialize, Serialize};

/// Groups related event types for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventDomain {
    /// Gateway pagination and local storage of downloaded keys.
    #[serde(rename = "DOWNLOAD")]
    Download,
    /// Candidate selection, signing and publishing of local keys.
    #[serde(rename = "UPLOAD")]
    Upload,
    /// Per-key rejections on either path.
    #[serde(rename = "VALIDATION")]
    Validation,
}

impl EventDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "DOWNLOAD",
            Self::Upload => "UPLOAD",
            Self::Validation => "VALIDATION",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventDomain {
    type Err = ParseEventDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOWNLOAD" => Ok(Self::Download),
            "UPLOAD" => Ok(Self::Upload),
            "VALIDATION" => Ok(Self::Validation),
            _ => Err(ParseEventDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event domain string.
#[derive(Debug, Clone)]
pub struct ParseEventDomainError(pub String);

impl std::fmt::Display for ParseEventDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event domain: {}", self.0)
    }
}

impl std::error::Error for ParseEventDomainError {}

/// Structured payloads for each event type.
///
/// Serialised to JSON in the `payload_json` column of `event_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ── Download domain ──────────────────────────────────────────────
    /// A page was fetched from the gateway.
    DownloadedExposures {
        batch_tag: String,
        exposure_count: usize,
        batch_number: usize,
    },

    /// Validation summary for one origin group of a page.
    DownloadedFederatedDiagnosisKeys {
        origin: String,
        valid_keys: usize,
        invalid_keys: usize,
    },

    /// A group was dropped because its origin is not on the allow-list.
    InvalidOriginKeys { origin: String, batch_tag: String },

    /// The gateway returned no page. Pagination stops here.
    DownloadPageUnavailable {
        date: String,
        batch_tag: Option<String>,
        reason: String,
    },

    DownloadFinished { batch_count: usize },

    // ── Upload domain ────────────────────────────────────────────────
    /// A candidate was skipped because it was itself ingested from the gateway.
    SelfExportExcluded { storage_key: String },

    UploadedDiagnosisKeys {
        test_type: String,
        exposure_count: usize,
        batch_number: usize,
    },

    /// The gateway accepted fewer exposures than were sent.
    DiagnosisKeysUploadIncomplete {
        sent: usize,
        inserted: usize,
        batch_number: usize,
    },

    /// Publishing stopped before a chunk because too little time remained.
    UploadBudgetExhausted {
        remaining_ms: u64,
        required_ms: u64,
        batch_number: usize,
    },

    UploadFinished {
        exposure_count: usize,
        batch_count: usize,
    },

    // ── Validation domain ────────────────────────────────────────────
    /// Key data is not valid base64 or does not decode to a full key.
    InvalidTemporaryExposureKey { reason: String },

    InvalidRollingStartNumber {
        rolling_start_number: i64,
        now_interval: i64,
    },

    InvalidRollingPeriod { rolling_period: i32 },

    InvalidTransmissionRiskLevel { transmission_risk_level: i32 },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DownloadedExposures { .. } => "DOWNLOADED_EXPOSURES",
            Self::DownloadedFederatedDiagnosisKeys { .. } => "DOWNLOADED_FEDERATED_DIAGNOSIS_KEYS",
            Self::InvalidOriginKeys { .. } => "INVALID_ORIGIN_KEYS",
            Self::DownloadPageUnavailable { .. } => "DOWNLOAD_PAGE_UNAVAILABLE",
            Self::DownloadFinished { .. } => "DOWNLOAD_FINISHED",
            Self::SelfExportExcluded { .. } => "SELF_EXPORT_EXCLUDED",
            Self::UploadedDiagnosisKeys { .. } => "UPLOADED_DIAGNOSIS_KEYS",
            Self::DiagnosisKeysUploadIncomplete { .. } => "DIAGNOSIS_KEYS_UPLOAD_INCOMPLETE",
            Self::UploadBudgetExhausted { .. } => "UPLOAD_BUDGET_EXHAUSTED",
            Self::UploadFinished { .. } => "UPLOAD_FINISHED",
            Self::InvalidTemporaryExposureKey { .. } => "INVALID_TEMPORARY_EXPOSURE_KEY",
            Self::InvalidRollingStartNumber { .. } => "INVALID_ROLLING_START_NUMBER",
            Self::InvalidRollingPeriod { .. } => "INVALID_ROLLING_PERIOD",
            Self::InvalidTransmissionRiskLevel { .. } => "INVALID_TRANSMISSION_RISK_LEVEL",
        }
    }

    /// Returns the entity type recorded in the `entity_type` column.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::DownloadedExposures { .. }
            | Self::DownloadPageUnavailable { .. }
            | Self::UploadedDiagnosisKeys { .. }
            | Self::DiagnosisKeysUploadIncomplete { .. }
            | Self::UploadBudgetExhausted { .. } => "batch",
            Self::DownloadedFederatedDiagnosisKeys { .. } | Self::InvalidOriginKeys { .. } => {
                "origin"
            }
            Self::DownloadFinished { .. } | Self::UploadFinished { .. } => "run",
            Self::SelfExportExcluded { .. } => "submission",
            Self::InvalidTemporaryExposureKey { .. }
            | Self::InvalidRollingStartNumber { .. }
            | Self::InvalidRollingPeriod { .. }
            | Self::InvalidTransmissionRiskLevel { .. } => "key",
        }
    }

    /// Returns the identifier recorded in the `entity_id` column.
    ///
    /// Rejected keys are never identified by their key material.
    pub fn entity_id(&self) -> String {
        match self {
            Self::DownloadedExposures { batch_tag, .. } => batch_tag.clone(),
            Self::DownloadPageUnavailable { batch_tag, date, .. } => {
                batch_tag.clone().unwrap_or_else(|| date.clone())
            }
            Self::DownloadedFederatedDiagnosisKeys { origin, .. }
            | Self::InvalidOriginKeys { origin, .. } => origin.clone(),
            Self::SelfExportExcluded { storage_key } => storage_key.clone(),
            Self::UploadedDiagnosisKeys { batch_number, .. }
            | Self::DiagnosisKeysUploadIncomplete { batch_number, .. }
            | Self::UploadBudgetExhausted { batch_number, .. } => batch_number.to_string(),
            Self::DownloadFinished { .. }
            | Self::UploadFinished { .. }
            | Self::InvalidTemporaryExposureKey { .. }
            | Self::InvalidRollingStartNumber { .. }
            | Self::InvalidRollingPeriod { .. }
            | Self::InvalidTransmissionRiskLevel { .. } => String::new(),
        }
    }

    pub fn domain(&self) -> EventDomain {
        match self {
            Self::DownloadedExposures { .. }
            | Self::DownloadedFederatedDiagnosisKeys { .. }
            | Self::InvalidOriginKeys { .. }
            | Self::DownloadPageUnavailable { .. }
            | Self::DownloadFinished { .. } => EventDomain::Download,
            Self::SelfExportExcluded { .. }
            | Self::UploadedDiagnosisKeys { .. }
            | Self::DiagnosisKeysUploadIncomplete { .. }
            | Self::UploadBudgetExhausted { .. }
            | Self::UploadFinished { .. } => EventDomain::Upload,
            Self::InvalidTemporaryExposureKey { .. }
            | Self::InvalidRollingStartNumber { .. }
            | Self::InvalidRollingPeriod { .. }
            | Self::InvalidTransmissionRiskLevel { .. } => EventDomain::Validation,
        }
    }

    /// Whether operators should be alerted to this event.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::InvalidOriginKeys { .. }
                | Self::DownloadPageUnavailable { .. }
                | Self::DiagnosisKeysUploadIncomplete { .. }
                | Self::InvalidTemporaryExposureKey { .. }
                | Self::InvalidRollingStartNumber { .. }
                | Self::InvalidRollingPeriod { .. }
                | Self::InvalidTransmissionRiskLevel { .. }
        )
    }
}

/// A single row from the `event_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub id: i64,
    pub seq: i64,
    pub domain: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// The structured event payload as a JSON string.
    pub payload_json: String,
    /// ISO 8601 UTC timestamp.
    pub occurred_at: String,
}

impl LoggedEvent {
    /// Decodes the stored payload.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the stored payload does not match any variant.
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}
