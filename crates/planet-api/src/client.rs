use std::time::Duration;

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::{
    BatchIngestResponse, IngestOptions, IngestResponse, IngestStatusResponse, QueryRequest,
    QueryResponse, SessionClearResponse, SessionInfo,
};
use crate::{DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_QUERY_TIMEOUT_MS};

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub query_timeout_ms: u64,
    pub probe_timeout_ms: u64,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api_base_url_missing")]
    BaseUrlMissing,
    #[error("api_base_url_invalid")]
    InvalidBaseUrl,
    #[error("api_request_timeout")]
    Timeout,
    #[error("api_request_failed:{message}")]
    Transport { message: String },
    #[error("api_http_{status}:{detail}")]
    Http { status: StatusCode, detail: String },
    #[error("api_json_decode_failed:{message}")]
    Decode { message: String },
}

impl ApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout)
    }

    /// Server-provided detail text for HTTP errors, if any.
    pub fn server_detail(&self) -> Option<&str> {
        match self {
            ApiError::Http { detail, .. } if !detail.is_empty() => Some(detail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    query_timeout: Duration,
    probe_timeout: Duration,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            query_timeout: Duration::from_millis(config.query_timeout_ms.max(1_000)),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms.max(250)),
            http: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn query_path() -> &'static str {
        "/api/v1/query/"
    }

    pub fn ingest_file_path() -> &'static str {
        "/api/v1/ingest/file"
    }

    pub fn ingest_batch_path() -> &'static str {
        "/api/v1/ingest/batch"
    }

    pub fn ingest_status_path(task_id: &str) -> String {
        format!("/api/v1/ingest/status/{}", task_id.trim())
    }

    pub fn session_info_path() -> &'static str {
        "/api/v1/session/info"
    }

    pub fn session_clear_path(clear_documents: bool, clear_chat_history: bool) -> String {
        format!(
            "/api/v1/session/clear?clear_documents={clear_documents}&clear_chat_history={clear_chat_history}"
        )
    }

    pub fn health_path() -> &'static str {
        "/health"
    }

    pub fn query_health_path() -> &'static str {
        "/api/v1/query/health"
    }

    pub fn vector_stats_path() -> &'static str {
        "/api/v1/vector/stats"
    }

    /// Submit a grounded question. The backend may take minutes; the
    /// request timeout reflects that and must not be shortened by
    /// callers expecting interactive latency.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        debug!(session_id = %request.session_id, "submitting query");
        self.post_json(Self::query_path(), request, self.query_timeout)
            .await
    }

    pub async fn ingest_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        session_id: &str,
        options: &IngestOptions,
    ) -> Result<IngestResponse, ApiError> {
        let form = ingest_form(session_id, options)
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        self.post_multipart(Self::ingest_file_path(), form).await
    }

    pub async fn ingest_batch(
        &self,
        files: Vec<(String, Vec<u8>)>,
        session_id: &str,
        options: &IngestOptions,
    ) -> Result<BatchIngestResponse, ApiError> {
        let mut form = ingest_form(session_id, options);
        for (file_name, bytes) in files {
            form = form.part("files", Part::bytes(bytes).file_name(file_name));
        }
        self.post_multipart(Self::ingest_batch_path(), form).await
    }

    pub async fn ingest_status(&self, task_id: &str) -> Result<IngestStatusResponse, ApiError> {
        self.get_json(&Self::ingest_status_path(task_id), None, self.probe_timeout)
            .await
    }

    pub async fn session_info(&self, session_id: &str) -> Result<SessionInfo, ApiError> {
        self.get_json(Self::session_info_path(), Some(session_id), self.probe_timeout)
            .await
    }

    /// Destructive server-side reset of the session's documents and
    /// chat history.
    pub async fn clear_session(
        &self,
        session_id: &str,
        clear_documents: bool,
        clear_chat_history: bool,
    ) -> Result<SessionClearResponse, ApiError> {
        let path = Self::session_clear_path(clear_documents, clear_chat_history);
        let request = self
            .http
            .delete(self.endpoint(&path))
            .header("x-request-id", request_id())
            .header("X-Session-ID", session_id)
            .timeout(self.probe_timeout);
        let response = request.send().await.map_err(classify_send_error)?;
        decode_json_response(response).await
    }

    pub async fn health(&self) -> Result<serde_json::Value, ApiError> {
        self.get_json(Self::health_path(), None, self.probe_timeout)
            .await
    }

    pub async fn query_health(&self) -> Result<serde_json::Value, ApiError> {
        self.get_json(Self::query_health_path(), None, self.probe_timeout)
            .await
    }

    pub async fn vector_stats(&self) -> Result<serde_json::Value, ApiError> {
        self.get_json(Self::vector_stats_path(), None, self.probe_timeout)
            .await
    }

    async fn get_json<T>(
        &self,
        path: &str,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<T, ApiError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut request = self
            .http
            .get(self.endpoint(path))
            .header("x-request-id", request_id())
            .timeout(timeout);
        if let Some(session_id) = session_id {
            request = request.header("X-Session-ID", session_id);
        }
        let response = request.send().await.map_err(classify_send_error)?;
        decode_json_response(response).await
    }

    async fn post_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let request = self
            .http
            .post(self.endpoint(path))
            .header("x-request-id", request_id())
            .timeout(timeout)
            .json(payload);
        let response = request.send().await.map_err(classify_send_error)?;
        decode_json_response(response).await
    }

    async fn post_multipart<Res>(&self, path: &str, form: Form) -> Result<Res, ApiError>
    where
        Res: for<'de> serde::Deserialize<'de>,
    {
        // Ingestion shares the long query timeout: chunking and
        // embedding large documents is slow.
        let request = self
            .http
            .post(self.endpoint(path))
            .header("x-request-id", request_id())
            .timeout(self.query_timeout)
            .multipart(form);
        let response = request.send().await.map_err(classify_send_error)?;
        decode_json_response(response).await
    }
}

fn ingest_form(session_id: &str, options: &IngestOptions) -> Form {
    let mut form = Form::new()
        .text("session_id", session_id.to_string())
        .text("chunking_strategy", options.chunking_strategy.clone());
    if let Some(chunk_size) = options.chunk_size {
        form = form.text("chunk_size", chunk_size.to_string());
    }
    if let Some(chunk_overlap) = options.chunk_overlap {
        form = form.text("chunk_overlap", chunk_overlap.to_string());
    }
    form
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn classify_send_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport {
            message: error.to_string(),
        }
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ApiError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::BaseUrlMissing);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ApiError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ApiError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| {
        if error.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport {
                message: error.to_string(),
            }
        }
    })?;

    if !status.is_success() {
        return Err(http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ApiError::Decode {
        message: error.to_string(),
    })
}

/// Surface the server's `{"detail": ...}` text when the error body
/// carries one; otherwise fall back to the status reason.
fn http_error(status: StatusCode, body: &[u8]) -> ApiError {
    let detail = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(|detail| detail.as_str())
                .map(|detail| detail.trim().to_string())
        })
        .filter(|detail| !detail.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    ApiError::Http { status, detail }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed_and_requires_http_scheme() {
        let client = ApiClient::new(ApiClientConfig::new(" http://localhost:8000/ "))
            .expect("valid base url");
        assert_eq!(client.base_url(), "http://localhost:8000");

        assert!(matches!(
            ApiClient::new(ApiClientConfig::new("   ")),
            Err(ApiError::BaseUrlMissing)
        ));
        assert!(matches!(
            ApiClient::new(ApiClientConfig::new("localhost:8000")),
            Err(ApiError::InvalidBaseUrl)
        ));
    }

    #[test]
    fn path_helpers_are_deterministic() {
        assert_eq!(ApiClient::query_path(), "/api/v1/query/");
        assert_eq!(ApiClient::ingest_file_path(), "/api/v1/ingest/file");
        assert_eq!(ApiClient::ingest_batch_path(), "/api/v1/ingest/batch");
        assert_eq!(
            ApiClient::ingest_status_path(" task-7 "),
            "/api/v1/ingest/status/task-7"
        );
        assert_eq!(
            ApiClient::session_clear_path(true, false),
            "/api/v1/session/clear?clear_documents=true&clear_chat_history=false"
        );
        assert_eq!(ApiClient::vector_stats_path(), "/api/v1/vector/stats");
    }

    #[test]
    fn http_error_prefers_server_detail_text() {
        let with_detail = http_error(
            StatusCode::BAD_REQUEST,
            br#"{"detail": "File type '.exe' is not supported."}"#,
        );
        assert_eq!(
            with_detail.server_detail(),
            Some("File type '.exe' is not supported.")
        );

        let without_detail = http_error(StatusCode::BAD_GATEWAY, b"upstream down");
        assert_eq!(without_detail.server_detail(), Some("Bad Gateway"));
    }

    #[test]
    fn timeout_classification_is_exposed() {
        assert!(ApiError::Timeout.is_timeout());
        assert!(
            !ApiError::Transport {
                message: "refused".to_string()
            }
            .is_timeout()
        );
    }
}
