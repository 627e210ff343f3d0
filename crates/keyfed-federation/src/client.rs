//! HTTP client for the federation gateway and the download pagination protocol.

use std::time::Duration;

use chrono::NaiveDate;
use keyfed_types::{gateway_date, BatchTag, Page, UploadState};
use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::error::InteropError;
use crate::types::DiagnosisKeysUploadRequest;

/// Why a download call produced no page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    /// `204`, or `200` with an empty batch tag: the gateway has nothing newer.
    NoContent,
    /// Transport failure, non-success status or unreadable body.
    Failed(String),
}

impl std::fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoContent => f.write_str("no content"),
            Self::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Result of one download call. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Batch(Page),
    Empty(EmptyReason),
}

/// The two gateway operations the pipelines rely on.
pub trait InteropGatewayClient: Send + Sync {
    /// Fetches the page following `batch_tag` for `date`, or the first page
    /// of that date when no tag is given.
    fn download_page(&self, date: NaiveDate, batch_tag: Option<&BatchTag>) -> DownloadOutcome;

    /// Publishes one signed batch.
    ///
    /// # Errors
    ///
    /// Any transport failure or non-`200` response is returned as an
    /// [`InteropError`]; callers must treat it as fatal for the run.
    fn upload_batch(
        &self,
        batch_tag: &BatchTag,
        signed_payload: &str,
    ) -> Result<UploadState, InteropError>;
}

/// [`InteropGatewayClient`] over HTTPS with bearer-token authorization.
#[derive(Debug, Clone)]
pub struct HttpInteropClient {
    base_url: String,
    auth_token: String,
    http: Client,
}

impl HttpInteropClient {
    /// Builds a client for `base_url` (without a trailing `/diagnosiskeys`).
    ///
    /// # Errors
    ///
    /// Returns `InteropError::Transport` if the TLS backend cannot be set up.
    pub fn new(
        base_url: &str,
        auth_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, InteropError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            http,
        })
    }

    fn download_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/diagnosiskeys/download/{}",
            self.base_url,
            gateway_date(date)
        )
    }

    fn fetch_page(
        &self,
        date: NaiveDate,
        batch_tag: Option<&BatchTag>,
    ) -> Result<Option<Page>, InteropError> {
        let mut request = self
            .http
            .get(self.download_url(date))
            .bearer_auth(&self.auth_token);
        if let Some(tag) = batch_tag {
            request = request.query(&[("batchTag", tag.as_str())]);
        }

        let response = request.send()?;
        let status = response.status();
        tracing::debug!(
            date = %date,
            batch_tag = batch_tag.map(BatchTag::as_str),
            status = status.as_u16(),
            "gateway download response"
        );

        match status {
            StatusCode::OK => {
                let body = response.text()?;
                let page: Page = serde_json::from_str(&body)?;
                if page.batch_tag.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(page))
                }
            }
            StatusCode::NO_CONTENT => Ok(None),
            other => Err(InteropError::UnexpectedStatus {
                status: other.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }
}

impl InteropGatewayClient for HttpInteropClient {
    fn download_page(&self, date: NaiveDate, batch_tag: Option<&BatchTag>) -> DownloadOutcome {
        match self.fetch_page(date, batch_tag) {
            Ok(Some(page)) => DownloadOutcome::Batch(page),
            Ok(None) => DownloadOutcome::Empty(EmptyReason::NoContent),
            Err(e) => {
                tracing::warn!(
                    date = %date,
                    batch_tag = batch_tag.map(BatchTag::as_str),
                    error = %e,
                    "gateway download failed, treating as no content"
                );
                DownloadOutcome::Empty(EmptyReason::Failed(e.to_string()))
            }
        }
    }

    fn upload_batch(
        &self,
        batch_tag: &BatchTag,
        signed_payload: &str,
    ) -> Result<UploadState, InteropError> {
        let body = DiagnosisKeysUploadRequest {
            batch_tag: batch_tag.clone(),
            payload: signed_payload.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/diagnosiskeys/upload", self.base_url))
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(InteropError::UnexpectedStatus {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let text = response.text()?;
        let state: UploadState = serde_json::from_str(&text)?;
        tracing::debug!(
            batch_tag = %state.batch_tag,
            inserted = state.inserted_exposures,
            "gateway accepted upload"
        );
        Ok(state)
    }
}

/// Iterator over the pages of one download date.
///
/// Starts from `start` (or the date's first page), follows each page's batch
/// tag and stops at the first empty result. The reason for stopping is kept
/// in [`Pages::end_reason`].
pub struct Pages<'a> {
    client: &'a dyn InteropGatewayClient,
    date: NaiveDate,
    next_tag: Option<BatchTag>,
    end: Option<EmptyReason>,
}

impl<'a> Pages<'a> {
    pub fn new(client: &'a dyn InteropGatewayClient, date: NaiveDate, start: Option<BatchTag>) -> Self {
        Self {
            client,
            date,
            next_tag: start,
            end: None,
        }
    }

    /// Why pagination ended, once it has.
    pub fn end_reason(&self) -> Option<&EmptyReason> {
        self.end.as_ref()
    }

    /// The tag the next request will be qualified by.
    pub fn next_tag(&self) -> Option<&BatchTag> {
        self.next_tag.as_ref()
    }
}

impl Iterator for Pages<'_> {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.end.is_some() {
            return None;
        }
        match self.client.download_page(self.date, self.next_tag.as_ref()) {
            DownloadOutcome::Batch(page) if !page.batch_tag.is_empty() => {
                self.next_tag = Some(page.batch_tag.clone());
                Some(page)
            }
            DownloadOutcome::Batch(_) => {
                self.end = Some(EmptyReason::NoContent);
                None
            }
            DownloadOutcome::Empty(reason) => {
                self.end = Some(reason);
                None
            }
        }
    }
}
