//! Wire types for the `/api/v1` contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: String,
    pub include_sources: bool,
    pub max_results: u32,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            include_sources: true,
            max_results: 10,
        }
    }
}

/// A successful answer carries `response`; a grounding refusal carries
/// `refusal` instead. Confidence and conflict flags arrive under either
/// of two field names depending on backend version.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default, alias = "confidence_score")]
    pub confidence: Option<f64>,
    #[serde(default, alias = "conflicts_detected")]
    pub has_conflicts: bool,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl QueryResponse {
    /// Refusal text wins over the primary response text.
    pub fn display_text(&self) -> &str {
        self.refusal
            .as_deref()
            .or(self.response.as_deref())
            .unwrap_or("")
    }

    pub fn is_refusal(&self) -> bool {
        self.refusal.is_some()
    }
}

/// A cited source is either a bare filename or a scored record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Name(String),
    Detail(SourceDetail),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceDetail {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

/// Canonical source record produced at the network boundary so callers
/// never branch on the wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub label: String,
    pub score: Option<f64>,
    pub modality: Option<String>,
    pub page: Option<u32>,
}

impl SourceRef {
    pub fn normalize(&self) -> SourceRecord {
        match self {
            SourceRef::Name(name) => SourceRecord {
                label: name.clone(),
                score: None,
                modality: None,
                page: None,
            },
            SourceRef::Detail(detail) => SourceRecord {
                // First present field wins.
                label: detail
                    .file
                    .clone()
                    .or_else(|| detail.file_name.clone())
                    .or_else(|| detail.filename.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                score: detail.score.map(normalize_confidence),
                modality: detail.modality.clone(),
                page: detail.page,
            },
        }
    }
}

/// Canonical confidence scale is 0-1. Upstream sends either 0-1 or an
/// already-scaled percentage; anything above 1.0 is treated as 0-100.
pub fn normalize_confidence(raw: f64) -> f64 {
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOptions {
    pub chunking_strategy: String,
    pub chunk_size: Option<u32>,
    pub chunk_overlap: Option<u32>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunking_strategy: "semantic".to_string(),
            chunk_size: None,
            chunk_overlap: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub chunks: u32,
    #[serde(default)]
    pub indexed: u32,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub modality: Option<String>,
}

impl IngestResponse {
    /// `chunks`, falling back to `indexed`, defaulting to 0.
    pub fn chunk_count(&self) -> u32 {
        if self.chunks > 0 { self.chunks } else { self.indexed }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchIngestResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<BatchFileResult>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub successful: u32,
}

/// Per-file batch outcome, order-aligned with submission order.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFileResult {
    pub file: String,
    pub status: String,
    #[serde(default)]
    pub chunks: u32,
    #[serde(default)]
    pub indexed: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchFileResult {
    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }

    pub fn chunk_count(&self) -> u32 {
        if self.chunks > 0 { self.chunks } else { self.indexed }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestStatusResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(default)]
    pub document_count: u32,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub chat_history: SessionChatHistory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionChatHistory {
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub last_timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionClearResponse {
    pub status: String,
    pub session_id: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ref_accepts_bare_filename_strings() {
        let source: SourceRef = serde_json::from_str("\"notes.pdf\"").expect("bare string source");
        let record = source.normalize();
        assert_eq!(record.label, "notes.pdf");
        assert_eq!(record.score, None);
        assert_eq!(record.page, None);
    }

    #[test]
    fn source_ref_normalizes_object_with_first_present_name_field() {
        let source: SourceRef = serde_json::from_str(
            r#"{"file": "b.pdf", "score": 0.9, "modality": "image", "page": 3}"#,
        )
        .expect("object source");
        let record = source.normalize();
        assert_eq!(record.label, "b.pdf");
        assert_eq!(record.score, Some(0.9));
        assert_eq!(record.modality.as_deref(), Some("image"));
        assert_eq!(record.page, Some(3));
    }

    #[test]
    fn source_ref_falls_back_through_name_fields_to_unknown() {
        let with_file_name: SourceRef =
            serde_json::from_str(r#"{"file_name": "a.txt", "score": 0.5}"#).expect("source");
        assert_eq!(with_file_name.normalize().label, "a.txt");

        let with_filename: SourceRef =
            serde_json::from_str(r#"{"filename": "c.wav"}"#).expect("source");
        assert_eq!(with_filename.normalize().label, "c.wav");

        let nameless: SourceRef = serde_json::from_str(r#"{"score": 0.2}"#).expect("source");
        assert_eq!(nameless.normalize().label, "Unknown");
    }

    #[test]
    fn confidence_normalization_accepts_both_scales() {
        assert!((normalize_confidence(0.87) - 0.87).abs() < f64::EPSILON);
        assert!((normalize_confidence(87.0) - 0.87).abs() < f64::EPSILON);
        assert!((normalize_confidence(150.0) - 1.0).abs() < f64::EPSILON);
        assert!((normalize_confidence(-0.3) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn query_response_accepts_either_confidence_field_name() {
        let scored: QueryResponse =
            serde_json::from_str(r#"{"response": "ok", "sources": [], "confidence_score": 0.7}"#)
                .expect("confidence_score variant");
        assert_eq!(scored.confidence, Some(0.7));

        let plain: QueryResponse =
            serde_json::from_str(r#"{"response": "ok", "sources": [], "confidence": 0.4}"#)
                .expect("confidence variant");
        assert_eq!(plain.confidence, Some(0.4));
    }

    #[test]
    fn query_response_prefers_refusal_text() {
        let refused: QueryResponse = serde_json::from_str(
            r#"{"response": "partial", "refusal": "Not enough evidence.", "sources": []}"#,
        )
        .expect("refusal response");
        assert!(refused.is_refusal());
        assert_eq!(refused.display_text(), "Not enough evidence.");
    }

    #[test]
    fn ingest_response_chunk_count_falls_back_to_indexed() {
        let body: IngestResponse =
            serde_json::from_str(r#"{"status": "success", "indexed": 12}"#).expect("ingest body");
        assert_eq!(body.chunk_count(), 12);

        let empty: IngestResponse =
            serde_json::from_str(r#"{"status": "success"}"#).expect("ingest body");
        assert_eq!(empty.chunk_count(), 0);
    }
}
