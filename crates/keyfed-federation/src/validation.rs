//! Per-key validation and grouping of downloaded pages by origin.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use keyfed_observe::{EventPayload, Events};
use keyfed_types::{
    interval_number, Page, RawExposureKey, StoredExposureKey, KEY_LENGTH, MAX_ROLLING_PERIOD,
    MAX_TRANSMISSION_RISK_LEVEL, RETENTION_DAYS,
};

/// Why a single key was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRejection {
    /// Key data is not base64 or not exactly [`KEY_LENGTH`] bytes.
    KeyData(String),
    /// Starts in the future or ended before the retention window.
    RollingStartNumber { rolling_start_number: i64, now_interval: i64 },
    RollingPeriod(i32),
    TransmissionRiskLevel(i32),
}

impl KeyRejection {
    pub fn into_event(self) -> EventPayload {
        match self {
            Self::KeyData(reason) => EventPayload::InvalidTemporaryExposureKey { reason },
            Self::RollingStartNumber {
                rolling_start_number,
                now_interval,
            } => EventPayload::InvalidRollingStartNumber {
                rolling_start_number,
                now_interval,
            },
            Self::RollingPeriod(rolling_period) => EventPayload::InvalidRollingPeriod { rolling_period },
            Self::TransmissionRiskLevel(transmission_risk_level) => {
                EventPayload::InvalidTransmissionRiskLevel {
                    transmission_risk_level,
                }
            }
        }
    }
}

/// Checks that `key_data` is base64 for exactly one key.
///
/// # Errors
///
/// Returns [`KeyRejection::KeyData`] describing the problem. The reason never
/// includes the key material itself.
pub fn check_key_data(key_data: &str) -> Result<(), KeyRejection> {
    match STANDARD.decode(key_data) {
        Ok(bytes) if bytes.len() == KEY_LENGTH => Ok(()),
        Ok(bytes) => Err(KeyRejection::KeyData(format!(
            "decoded length {} (expected {KEY_LENGTH})",
            bytes.len()
        ))),
        Err(e) => Err(KeyRejection::KeyData(format!("invalid base64: {e}"))),
    }
}

/// Filters downloaded keys and groups the survivors by origin.
#[derive(Debug, Clone, Default)]
pub struct KeyValidator {
    valid_origins: Vec<String>,
}

impl KeyValidator {
    /// A validator that accepts every origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts storage to the listed origins. An empty list accepts all.
    pub fn with_valid_origins(valid_origins: Vec<String>) -> Self {
        Self { valid_origins }
    }

    /// Runs every per-key check against `now`.
    ///
    /// A key is current if it started no later than the interval containing
    /// `now` and was still valid at some point in the last
    /// [`RETENTION_DAYS`] days.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn check(&self, key: &RawExposureKey, now: DateTime<Utc>) -> Result<(), KeyRejection> {
        check_key_data(&key.key_data)?;

        let now_interval = interval_number(now);
        let expiry_interval = interval_number(now - Duration::days(RETENTION_DAYS));
        let rsn = key.rolling_start_number;
        let ends = rsn.saturating_add(i64::from(key.rolling_period));
        if rsn > now_interval || ends < expiry_interval {
            return Err(KeyRejection::RollingStartNumber {
                rolling_start_number: rsn,
                now_interval,
            });
        }

        if !(1..=MAX_ROLLING_PERIOD).contains(&key.rolling_period) {
            return Err(KeyRejection::RollingPeriod(key.rolling_period));
        }

        if !(0..=MAX_TRANSMISSION_RISK_LEVEL).contains(&key.transmission_risk_level) {
            return Err(KeyRejection::TransmissionRiskLevel(key.transmission_risk_level));
        }

        Ok(())
    }

    /// Groups `page` by origin, keeping only valid keys.
    ///
    /// Only confirmed lab results are federated; other keys are dropped
    /// before grouping. Groups left empty after filtering are omitted, as
    /// are groups whose origin is not on the allow-list. Never fails: every
    /// rejection is reported through `events` and the entry is skipped.
    pub fn group(
        &self,
        page: &Page,
        now: DateTime<Utc>,
        events: &dyn Events,
    ) -> BTreeMap<String, Vec<StoredExposureKey>> {
        let mut by_origin: BTreeMap<String, Vec<&RawExposureKey>> = BTreeMap::new();
        let mut missing_origin = 0usize;
        let mut unconfirmed = 0usize;
        for key in &page.keys {
            if !key.is_confirmed_lab_result() {
                unconfirmed += 1;
                continue;
            }
            match key.effective_origin() {
                Some(origin) => by_origin.entry(origin.to_string()).or_default().push(key),
                None => missing_origin += 1,
            }
        }

        if unconfirmed > 0 {
            tracing::debug!(
                batch_tag = %page.batch_tag,
                count = unconfirmed,
                "skipping keys that are not confirmed lab results"
            );
        }

        if missing_origin > 0 {
            tracing::warn!(
                batch_tag = %page.batch_tag,
                count = missing_origin,
                "dropping keys without origin"
            );
            events.emit(EventPayload::InvalidOriginKeys {
                origin: String::new(),
                batch_tag: page.batch_tag.to_string(),
            });
        }

        let mut groups = BTreeMap::new();
        for (origin, keys) in by_origin {
            if !self.accepts_origin(&origin) {
                events.emit(EventPayload::InvalidOriginKeys {
                    origin,
                    batch_tag: page.batch_tag.to_string(),
                });
                continue;
            }

            let total = keys.len();
            let valid: Vec<StoredExposureKey> = keys
                .into_iter()
                .filter(|key| match self.check(key, now) {
                    Ok(()) => true,
                    Err(rejection) => {
                        events.emit(rejection.into_event());
                        false
                    }
                })
                .map(RawExposureKey::to_stored)
                .collect();

            events.emit(EventPayload::DownloadedFederatedDiagnosisKeys {
                origin: origin.clone(),
                valid_keys: valid.len(),
                invalid_keys: total - valid.len(),
            });

            if !valid.is_empty() {
                groups.insert(origin, valid);
            }
        }
        groups
    }

    fn accepts_origin(&self, origin: &str) -> bool {
        self.valid_origins.is_empty() || self.valid_origins.iter().any(|o| o == origin)
    }
}
