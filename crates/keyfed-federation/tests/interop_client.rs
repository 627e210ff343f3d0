//! Exercises `HttpInteropClient` against a stub gateway served over HTTP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use keyfed_federation::{
    verify_compact, DiagnosisKeysUploadRequest, DownloadOutcome, EmptyReason, HttpInteropClient,
    InteropError, InteropGatewayClient, JwsSigner, Pages, PayloadSigner, StaticKeyProvider,
};
use keyfed_types::BatchTag;
use p256::ecdsa::{SigningKey, VerifyingKey};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

const TOKEN: &str = "token-123";
const TAG_A: &str = "75b326f7-ae6f-42f6-9354-00c0a6b797b3";
const TAG_B: &str = "80e77dc6-8c27-42fb-8e38-1a0b1f57bf01";

#[derive(Clone, Default)]
struct Recorded {
    downloads: Arc<Mutex<Vec<(String, Option<String>, Option<String>)>>>,
    uploads: Arc<Mutex<Vec<DiagnosisKeysUploadRequest>>>,
    upload_status: Arc<Mutex<StatusCode>>,
}

fn exposures(n: usize) -> Vec<serde_json::Value> {
    (0..n)
        .map(|_| {
            serde_json::json!({
                "keyData": "ogNW4Ra+Zdds1ZOfeRyGVA==",
                "rollingStartNumber": 2666736,
                "transmissionRiskLevel": 4,
                "rollingPeriod": 144,
                "regions": ["GB"]
            })
        })
        .collect()
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn download(
    State(recorded): State<Recorded>,
    Path(date): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let tag = query.get("batchTag").cloned();
    recorded
        .downloads
        .lock()
        .unwrap()
        .push((date.clone(), tag.clone(), bearer(&headers)));

    match (date.as_str(), tag.as_deref()) {
        ("2020-09-01", None) => {
            Json(serde_json::json!({ "batchTag": TAG_A, "exposures": exposures(2) })).into_response()
        }
        ("2020-09-01", Some(TAG_A)) => {
            Json(serde_json::json!({ "batchTag": TAG_B, "exposures": exposures(5) })).into_response()
        }
        ("2020-09-01", Some(TAG_B)) => StatusCode::NO_CONTENT.into_response(),
        ("2020-09-03", _) => (StatusCode::OK, "not json").into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn upload(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<DiagnosisKeysUploadRequest>,
) -> Response {
    let status = *recorded.upload_status.lock().unwrap();
    if bearer(&headers).as_deref() != Some("Bearer token-123") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if status != StatusCode::OK {
        return (status, "try later").into_response();
    }
    let batch_tag = body.batch_tag.clone();
    recorded.uploads.lock().unwrap().push(body);
    Json(serde_json::json!({ "batchTag": batch_tag, "insertedExposures": 2 })).into_response()
}

struct StubGateway {
    _runtime: Runtime,
    addr: SocketAddr,
    recorded: Recorded,
}

impl StubGateway {
    fn start() -> Self {
        let recorded = Recorded {
            upload_status: Arc::new(Mutex::new(StatusCode::OK)),
            ..Recorded::default()
        };
        let app = Router::new()
            .route("/diagnosiskeys/download/{date}", get(download))
            .route("/diagnosiskeys/upload", post(upload))
            .with_state(recorded.clone());

        let runtime = Runtime::new().unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _runtime: runtime,
            addr,
            recorded,
        }
    }

    fn client(&self, token: &str) -> HttpInteropClient {
        HttpInteropClient::new(&format!("http://{}", self.addr), token, Duration::from_secs(5))
            .unwrap()
    }
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 9, day).unwrap()
}

#[test]
fn pagination_follows_batch_tags_until_no_content() {
    let gateway = StubGateway::start();
    let client = gateway.client(TOKEN);

    let mut pages = Pages::new(&client, date(1), None);
    let sizes: Vec<(String, usize)> = pages
        .by_ref()
        .map(|p| (p.batch_tag.to_string(), p.keys.len()))
        .collect();

    assert_eq!(sizes, vec![(TAG_A.to_string(), 2), (TAG_B.to_string(), 5)]);
    assert_eq!(pages.end_reason(), Some(&EmptyReason::NoContent));

    let downloads = gateway.recorded.downloads.lock().unwrap().clone();
    assert_eq!(downloads.len(), 3);
    assert_eq!(downloads[1].1.as_deref(), Some(TAG_A));
    assert!(downloads
        .iter()
        .all(|(d, _, auth)| d == "2020-09-01" && auth.as_deref() == Some("Bearer token-123")));
}

#[test]
fn server_error_is_soft_empty() {
    let gateway = StubGateway::start();
    let outcome = gateway.client(TOKEN).download_page(date(2), None);
    match outcome {
        DownloadOutcome::Empty(EmptyReason::Failed(reason)) => assert!(reason.contains("500")),
        other => panic!("expected soft failure, got {other:?}"),
    }
}

#[test]
fn unreadable_body_is_soft_empty() {
    let gateway = StubGateway::start();
    let outcome = gateway
        .client(TOKEN)
        .download_page(date(3), Some(&BatchTag::new(TAG_A)));
    assert!(matches!(outcome, DownloadOutcome::Empty(EmptyReason::Failed(_))));
}

#[test]
fn unreachable_gateway_is_soft_empty() {
    let client =
        HttpInteropClient::new("http://127.0.0.1:9", TOKEN, Duration::from_secs(2)).unwrap();
    assert!(matches!(
        client.download_page(date(1), None),
        DownloadOutcome::Empty(EmptyReason::Failed(_))
    ));
}

#[test]
fn upload_posts_signed_payload_with_bearer_token() {
    let gateway = StubGateway::start();
    let key = SigningKey::from_slice(&[7u8; 32]).unwrap();
    let signer = JwsSigner::new(Arc::new(StaticKeyProvider::new(key.clone())));
    let signed = signer.sign(br#"[{"keyData":"abc"},{"keyData":"def"}]"#).unwrap();
    let tag = BatchTag::generate();

    let state = gateway.client(TOKEN).upload_batch(&tag, &signed).unwrap();
    assert_eq!(state.batch_tag, tag);
    assert_eq!(state.inserted_exposures, 2);

    let uploads = gateway.recorded.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].batch_tag, tag);
    let payload = verify_compact(&uploads[0].payload, &VerifyingKey::from(&key)).unwrap();
    assert_eq!(payload, br#"[{"keyData":"abc"},{"keyData":"def"}]"#);
}

#[test]
fn upload_rejection_is_an_error() {
    let gateway = StubGateway::start();
    *gateway.recorded.upload_status.lock().unwrap() = StatusCode::SERVICE_UNAVAILABLE;

    let err = gateway
        .client(TOKEN)
        .upload_batch(&BatchTag::generate(), "a.b.c")
        .unwrap_err();
    match err {
        InteropError::UnexpectedStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "try later");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn wrong_token_is_rejected() {
    let gateway = StubGateway::start();
    let err = gateway
        .client("wrong")
        .upload_batch(&BatchTag::generate(), "a.b.c")
        .unwrap_err();
    assert!(matches!(err, InteropError::UnexpectedStatus { status: 401, .. }));
}
