mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::*;
use keyfed_federation::memory::{FixedBudget, FixedClock, InMemoryStateStore, InMemorySubmissionSource};
use keyfed_federation::{
    verify_compact, Clock, ExecutionBudget, FederationStateStore, JwsSigner, PayloadSigner,
    SigningError, SigningKeyProvider, StaticKeyProvider, UploadError, UploadPublishingPipeline,
    UploadSettings,
};
use keyfed_observe::{EventPayload, RecordingEvents};
use keyfed_types::{interval_number, CandidatePosition, ExposureUploadCandidate, StoredExposureKey};
use p256::ecdsa::{SigningKey, VerifyingKey};

fn signing_key() -> SigningKey {
    SigningKey::from_slice(&[7u8; 32]).unwrap()
}

fn candidate(storage_key: &str, minutes_ago: i64, index: u32) -> ExposureUploadCandidate {
    ExposureUploadCandidate::from_submission(
        storage_key,
        submitted(minutes_ago),
        index,
        StoredExposureKey {
            key: VALID_KEY.to_string(),
            rolling_start_number: interval_number(now() - ChronoDuration::days(1)),
            rolling_period: 144,
            transmission_risk_level: 4,
            days_since_onset: Some(2),
        },
    )
}

fn submitted(minutes_ago: i64) -> DateTime<Utc> {
    now() - ChronoDuration::minutes(minutes_ago)
}

fn four_candidates() -> Vec<ExposureUploadCandidate> {
    vec![
        candidate("mobile/LAB_RESULT/a.json", 40, 0),
        candidate("mobile/LAB_RESULT/a.json", 40, 1),
        candidate("mobile/RAPID_RESULT/b.json", 30, 0),
        candidate("mobile/RAPID_SELF_REPORTED/c.json", 20, 0),
    ]
}

fn settings(batch_size: usize) -> UploadSettings {
    UploadSettings {
        batch_size,
        min_remaining_time: Duration::from_secs(30),
        ..UploadSettings::default()
    }
}

struct Harness {
    gateway: Arc<ScriptedGateway>,
    state: Arc<InMemoryStateStore>,
    events: Arc<RecordingEvents>,
    pipeline: UploadPublishingPipeline,
}

fn harness_with(
    gateway: ScriptedGateway,
    candidates: Vec<ExposureUploadCandidate>,
    settings: UploadSettings,
    signer: Arc<dyn PayloadSigner>,
    clock: Arc<dyn Clock>,
) -> Harness {
    let gateway = Arc::new(gateway);
    let state = Arc::new(InMemoryStateStore::new());
    let events = Arc::new(RecordingEvents::new());
    let pipeline = UploadPublishingPipeline::new(
        gateway.clone(),
        state.clone(),
        Arc::new(InMemorySubmissionSource::new(candidates)),
        signer,
        clock,
        events.clone(),
        settings,
    );
    Harness {
        gateway,
        state,
        events,
        pipeline,
    }
}

fn harness_with_signer(
    gateway: ScriptedGateway,
    candidates: Vec<ExposureUploadCandidate>,
    settings: UploadSettings,
    signer: Arc<dyn PayloadSigner>,
) -> Harness {
    harness_with(gateway, candidates, settings, signer, Arc::new(FixedClock(now())))
}

fn harness(
    gateway: ScriptedGateway,
    candidates: Vec<ExposureUploadCandidate>,
    settings: UploadSettings,
) -> Harness {
    let signer = Arc::new(JwsSigner::new(Arc::new(StaticKeyProvider::new(signing_key()))));
    harness_with_signer(gateway, candidates, settings, signer)
}

#[test]
fn insufficient_budget_uploads_nothing() {
    let h = harness(ScriptedGateway::new(), four_candidates(), settings(2));

    let uploaded = h
        .pipeline
        .run(&FixedBudget(Duration::from_secs(5)))
        .expect("budget stop is not an error");

    assert_eq!(uploaded, 0);
    assert_eq!(h.gateway.upload_count(), 0);
    assert_eq!(h.state.upload_checkpoint().unwrap(), None);
    assert!(h.events.events().contains(&EventPayload::UploadBudgetExhausted {
        remaining_ms: 5_000,
        required_ms: 30_000,
        batch_number: 1,
    }));
}

#[test]
fn sufficient_budget_uploads_every_chunk() {
    let h = harness(ScriptedGateway::new(), four_candidates(), settings(2));

    let uploaded = h
        .pipeline
        .run(&FixedBudget(Duration::from_secs(600)))
        .expect("run");

    assert_eq!(uploaded, 4);
    assert_eq!(h.gateway.upload_count(), 2);
    assert_eq!(
        h.state.upload_checkpoint().unwrap(),
        Some(four_candidates()[3].position.clone())
    );
    assert!(h.state.upload_state().unwrap().is_some());
    assert_eq!(h.events.count("UPLOAD_BUDGET_EXHAUSTED"), 0);
    assert_eq!(
        h.events.events().last(),
        Some(&EventPayload::UploadFinished {
            exposure_count: 4,
            batch_count: 2,
        })
    );
}

#[test]
fn budget_runs_out_between_chunks() {
    struct Countdown(Mutex<Vec<Duration>>);

    impl ExecutionBudget for Countdown {
        fn remaining(&self) -> Duration {
            self.0.lock().unwrap().remove(0)
        }
    }

    let h = harness(ScriptedGateway::new(), four_candidates(), settings(2));
    let budget = Countdown(Mutex::new(vec![
        Duration::from_secs(60),
        Duration::from_secs(10),
    ]));

    assert_eq!(h.pipeline.run(&budget).expect("run"), 2);
    assert_eq!(h.gateway.upload_count(), 1);
    assert_eq!(
        h.state.upload_checkpoint().unwrap(),
        Some(four_candidates()[1].position.clone())
    );
}

#[test]
fn slow_chunk_raises_the_time_required_for_the_next() {
    // Each chunk takes five seconds on the pipeline clock.
    let clock = Arc::new(SteppingClock::new(now(), ChronoDuration::seconds(5)));
    let signer = Arc::new(JwsSigner::new(Arc::new(StaticKeyProvider::new(signing_key()))));
    let upload_settings = UploadSettings {
        min_remaining_time: Duration::ZERO,
        ..settings(2)
    };
    let h = harness_with(
        ScriptedGateway::new(),
        four_candidates(),
        upload_settings,
        signer,
        clock,
    );

    let uploaded = h
        .pipeline
        .run(&FixedBudget(Duration::from_secs(3)))
        .expect("budget stop is not an error");

    assert_eq!(uploaded, 2);
    assert_eq!(h.gateway.upload_count(), 1);
    assert_eq!(
        h.state.upload_checkpoint().unwrap(),
        Some(four_candidates()[1].position.clone())
    );
    assert!(h.events.events().contains(&EventPayload::UploadBudgetExhausted {
        remaining_ms: 3_000,
        required_ms: 5_000,
        batch_number: 2,
    }));
}

#[test]
fn payload_is_signed_and_carries_wire_fields() {
    let h = harness(ScriptedGateway::new(), four_candidates(), settings(0));

    assert_eq!(h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run"), 4);
    assert_eq!(h.gateway.upload_count(), 1, "batch size 0 sends one chunk");

    let token = &h.gateway.uploaded_payloads()[0];
    let payload = verify_compact(token, &VerifyingKey::from(&signing_key())).expect("verify");
    let exposures: Vec<serde_json::Value> = serde_json::from_slice(&payload).unwrap();

    assert_eq!(exposures.len(), 4);
    assert_eq!(exposures[0]["keyData"], VALID_KEY);
    assert_eq!(exposures[0]["regions"], serde_json::json!(["GB-EAW"]));
    assert_eq!(exposures[0]["testType"], 1);
    assert_eq!(exposures[0]["reportType"], 1);
    assert_eq!(exposures[0]["daysSinceOnset"], 2);
    assert_eq!(exposures[2]["testType"], 2);
    assert_eq!(exposures[2]["reportType"], 0);
    assert_eq!(exposures[3]["testType"], 3);
}

#[test]
fn federated_keys_are_never_exported() {
    let mut candidates = four_candidates();
    candidates.push(candidate("nearform/NI/20200915/75b326f7.json", 10, 0));
    let h = harness(ScriptedGateway::new(), candidates, settings(10));

    assert_eq!(h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run"), 4);

    let exposures = decode_payload(&h.gateway.uploaded_payloads()[0]);
    assert_eq!(exposures.len(), 4);
    assert_eq!(
        h.events.events().iter().find(|e| e.event_type() == "SELF_EXPORT_EXCLUDED"),
        Some(&EventPayload::SelfExportExcluded {
            storage_key: "nearform/NI/20200915/75b326f7.json".to_string(),
        })
    );
}

#[test]
fn short_key_data_is_excluded() {
    let mut candidates = four_candidates();
    candidates[1].key.key = "c2hvcnQ=".to_string();
    let h = harness(ScriptedGateway::new(), candidates, settings(10));

    assert_eq!(h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run"), 3);
    assert_eq!(h.events.count("INVALID_TEMPORARY_EXPOSURE_KEY"), 1);
}

#[test]
fn risk_level_default_is_applied() {
    let upload_settings = UploadSettings {
        risk_level_default: Some(7),
        ..settings(10)
    };
    let h = harness(ScriptedGateway::new(), four_candidates(), upload_settings);

    h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run");
    let exposures = decode_payload(&h.gateway.uploaded_payloads()[0]);
    assert!(exposures.iter().all(|e| e["transmissionRiskLevel"] == 7));
}

#[test]
fn upload_failure_keeps_checkpoint_at_last_confirmed_chunk() {
    let gateway = ScriptedGateway::new().fail_upload_on_call(2);
    let h = harness(gateway, four_candidates(), settings(2));

    let err = h
        .pipeline
        .run(&FixedBudget(Duration::from_secs(600)))
        .expect_err("upload failure is fatal");
    assert!(matches!(err, UploadError::Interop(_)));
    assert_eq!(
        h.state.upload_checkpoint().unwrap(),
        Some(four_candidates()[1].position.clone())
    );
}

#[test]
fn next_run_resumes_after_checkpoint() {
    let h = harness(ScriptedGateway::new(), four_candidates(), settings(2));
    h.state
        .set_upload_checkpoint(&four_candidates()[2].position)
        .unwrap();

    assert_eq!(h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run"), 1);
    let exposures = decode_payload(&h.gateway.uploaded_payloads()[0]);
    assert_eq!(exposures.len(), 1);
    assert_eq!(exposures[0]["testType"], 3);
}

#[test]
fn candidates_older_than_history_window_are_skipped() {
    let mut candidates = four_candidates();
    candidates.push(candidate("mobile/LAB_RESULT/old.json", 60 * 24 * 15, 0));
    let h = harness(ScriptedGateway::new(), candidates, settings(10));

    assert_eq!(h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run"), 4);
}

#[test]
fn incomplete_insert_is_reported() {
    let gateway = ScriptedGateway::new().report_inserted(1);
    let h = harness(gateway, four_candidates(), settings(2));

    assert_eq!(h.pipeline.run(&FixedBudget(Duration::from_secs(600))).expect("run"), 4);
    assert_eq!(h.events.count("DIAGNOSIS_KEYS_UPLOAD_INCOMPLETE"), 2);
}

#[test]
fn signing_failure_aborts_before_upload() {
    struct NoKey;

    impl SigningKeyProvider for NoKey {
        fn signing_key(&self) -> Result<SigningKey, SigningError> {
            Err(SigningError::KeyUnavailable("secret store unreachable".to_string()))
        }
    }

    let signer = Arc::new(JwsSigner::new(Arc::new(NoKey)));
    let h = harness_with_signer(ScriptedGateway::new(), four_candidates(), settings(2), signer);

    let err = h
        .pipeline
        .run(&FixedBudget(Duration::from_secs(600)))
        .expect_err("signing failure is fatal");
    assert!(matches!(err, UploadError::Signing(SigningError::KeyUnavailable(_))));
    assert_eq!(h.gateway.upload_count(), 0);
    assert_eq!(h.state.upload_checkpoint().unwrap(), None::<CandidatePosition>);
}
