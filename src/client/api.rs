// src/client/api.rs
//! Typed client for the poll endpoints, generic over the transport so the
//! same code runs directly against the network or through the cache worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{
    PollDetail, PollStatus, PollSummary, PollType, SubmitAccepted, SubmitRequest,
};

use super::cache::{CachedResponse, FetchError, Network, Request};

/// A hung request must become a connectivity failure instead of wedging the
/// submit path, so every call carries this explicit deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server could not be reached in time; the payload is safe to
    /// queue and retry.
    #[error("network unreachable: {0}")]
    Connectivity(String),

    /// The server answered and said no; retrying the same payload will not
    /// help without user action.
    #[error("{message}")]
    Rejected { code: String, message: String },
}

impl ApiError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Connectivity(_))
    }

    /// The one rejection the queue treats as delivered: the votes are
    /// already on the server from an earlier attempt.
    pub fn is_already_submitted(&self) -> bool {
        matches!(self, ApiError::Rejected { code, .. } if code == "already_submitted")
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        ApiError::Connectivity(err.to_string())
    }
}

#[async_trait]
pub trait PollClient: Send + Sync {
    async fn active_polls(&self, poll_type: PollType) -> Result<Vec<PollSummary>, ApiError>;
    async fn find_by_title(
        &self,
        title: &str,
        poll_type: Option<PollType>,
    ) -> Result<Option<PollSummary>, ApiError>;
    async fn find_by_slug(
        &self,
        slug: &str,
        poll_type: Option<PollType>,
    ) -> Result<Option<PollSummary>, ApiError>;
    async fn status_by_title(&self, title: &str) -> Result<PollStatus, ApiError>;
    async fn status_by_slug(&self, slug: &str) -> Result<PollStatus, ApiError>;
    async fn poll_detail(&self, poll_id: i32) -> Result<Option<PollDetail>, ApiError>;
    async fn submit(
        &self,
        poll_id: i32,
        request: &SubmitRequest,
    ) -> Result<SubmitAccepted, ApiError>;
}

pub struct PollApi {
    transport: Arc<dyn Network>,
}

impl PollApi {
    pub fn new(transport: Arc<dyn Network>) -> Self {
        Self { transport }
    }

    /// Client that skips the cache worker and talks straight to the server.
    pub fn direct(base_url: impl Into<String>) -> Self {
        Self::new(Arc::new(HttpNetwork::new(base_url)))
    }

    async fn send(&self, request: Request) -> Result<CachedResponse, ApiError> {
        Ok(self.transport.fetch(&request).await?)
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        request: Request,
    ) -> Result<Option<T>, ApiError> {
        let response = self.send(request).await?;
        if response.status == 404 {
            return Ok(None);
        }
        decode(&response).map(Some)
    }
}

fn decode<T: DeserializeOwned>(response: &CachedResponse) -> Result<T, ApiError> {
    if response.is_success() {
        serde_json::from_slice(&response.body).map_err(|e| ApiError::Rejected {
            code: "malformed_response".into(),
            message: e.to_string(),
        })
    } else {
        Err(rejection(response))
    }
}

fn rejection(response: &CachedResponse) -> ApiError {
    #[derive(Default, Deserialize)]
    struct ErrorBody {
        code: Option<String>,
        error: Option<String>,
    }

    let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
    ApiError::Rejected {
        code: body
            .code
            .unwrap_or_else(|| format!("http_{}", response.status)),
        message: body
            .error
            .unwrap_or_else(|| format!("request rejected with status {}", response.status)),
    }
}

#[async_trait]
impl PollClient for PollApi {
    async fn active_polls(&self, poll_type: PollType) -> Result<Vec<PollSummary>, ApiError> {
        let response = self
            .send(Request::get("/poll/active").query("type", poll_type.as_str()))
            .await?;
        decode(&response)
    }

    async fn find_by_title(
        &self,
        title: &str,
        poll_type: Option<PollType>,
    ) -> Result<Option<PollSummary>, ApiError> {
        let mut request = Request::get("/poll/by-title").query("title", title);
        if let Some(poll_type) = poll_type {
            request = request.query("type", poll_type.as_str());
        }
        self.fetch_optional(request).await
    }

    async fn find_by_slug(
        &self,
        slug: &str,
        poll_type: Option<PollType>,
    ) -> Result<Option<PollSummary>, ApiError> {
        let mut request = Request::get("/poll/by-slug").query("slug", slug);
        if let Some(poll_type) = poll_type {
            request = request.query("type", poll_type.as_str());
        }
        self.fetch_optional(request).await
    }

    async fn status_by_title(&self, title: &str) -> Result<PollStatus, ApiError> {
        let response = self
            .send(Request::get("/poll/status/by-title").query("title", title))
            .await?;
        decode(&response)
    }

    async fn status_by_slug(&self, slug: &str) -> Result<PollStatus, ApiError> {
        let response = self
            .send(Request::get("/poll/status/by-slug").query("slug", slug))
            .await?;
        decode(&response)
    }

    async fn poll_detail(&self, poll_id: i32) -> Result<Option<PollDetail>, ApiError> {
        self.fetch_optional(Request::get(format!("/poll/{poll_id}")))
            .await
    }

    async fn submit(
        &self,
        poll_id: i32,
        request: &SubmitRequest,
    ) -> Result<SubmitAccepted, ApiError> {
        let body = serde_json::to_vec(request).map_err(|e| ApiError::Rejected {
            code: "encode_failure".into(),
            message: e.to_string(),
        })?;
        let response = self
            .send(Request::post(format!("/poll/{poll_id}/submit"), body))
            .await?;
        decode(&response)
    }
}

/// reqwest-backed transport with the explicit request deadline.
pub struct HttpNetwork {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNetwork {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build http client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError(e.to_string()))?
            .to_vec();
        Ok(CachedResponse { status, body })
    }
}
