//! REST client for the Planet retrieval backend.
//!
//! Covers the `/api/v1` surface: grounded query, single and batch
//! document ingestion, session info/clear, and the liveness probes.
//! The query channel tolerates multi-minute latency (the backend may be
//! running multi-step reasoning); nothing here retries automatically.

mod client;
mod types;

pub use client::{ApiClient, ApiClientConfig, ApiError};
pub use types::{
    BatchFileResult, BatchIngestResponse, IngestOptions, IngestResponse, IngestStatusResponse,
    QueryRequest, QueryResponse, SessionChatHistory, SessionClearResponse, SessionInfo,
    SourceDetail, SourceRecord, SourceRef, normalize_confidence,
};

/// Query and ingest requests may sit behind multi-step LLM reasoning.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 360_000;
/// Probes and session bookkeeping answer quickly or not at all.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
