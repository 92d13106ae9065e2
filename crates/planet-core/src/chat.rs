//! Query orchestration.
//!
//! Drives the per-query state machine: submission, loading placeholder,
//! response arrival, deferred evidence materialization, typing-animation
//! completion, and error recovery. One query may be in flight per
//! planet; completions are matched against a [`QueryTicket`] so a stale
//! response arriving after navigation never mutates the visible
//! transcript.

use std::sync::Arc;
use std::time::{Duration, Instant};

use planet_api::{ApiError, QueryRequest, QueryResponse, SourceRecord, normalize_confidence};
use thiserror::Error;
use tracing::{debug, info};

use crate::store::{Message, Planet, SourceEntry, StateStore, StoreError, now_millis, short_suffix};
use crate::tasks::{EVIDENCE_REVEAL_MS, UiEffect, UiTask, typing_delay};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("a query is already in flight for this planet")]
    QueryInFlight,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identifies one submitted query and the planet it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTicket {
    pub query_id: String,
    pub planet_id: String,
}

/// Per-query structured summary shown alongside an answer. Derived from
/// the response and cleared at the start of every new query.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceBundle {
    /// Canonical 0-1 scale.
    pub confidence: f64,
    pub source_count: u32,
    pub cards: Vec<EvidenceCard>,
    pub conflicts_detected: bool,
    pub conflicts: Vec<String>,
}

impl EvidenceBundle {
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceCard {
    pub filename: String,
    pub confidence_percent: u32,
    pub modality: String,
    pub page: Option<u32>,
}

impl EvidenceCard {
    pub fn excerpt(&self) -> Option<String> {
        self.page.map(|page| format!("Page {page}"))
    }
}

#[derive(Debug)]
struct ActiveQuery {
    ticket: QueryTicket,
    placeholder_id: String,
    started: Instant,
}

/// Owns the in-memory transcript and evidence bundle for the currently
/// active planet, flushing to the store on every mutation. Unnamed
/// planets are never written to history.
#[derive(Debug)]
pub struct ChatController<S: StateStore> {
    store: Arc<S>,
    planet: Planet,
    active: Option<ActiveQuery>,
    evidence: Option<EvidenceBundle>,
    pending_evidence: Option<(String, EvidenceBundle)>,
}

impl<S: StateStore> ChatController<S> {
    pub fn new(store: Arc<S>, planet: Planet) -> Self {
        Self {
            store,
            planet,
            active: None,
            evidence: None,
            pending_evidence: None,
        }
    }

    pub fn planet(&self) -> &Planet {
        &self.planet
    }

    pub fn planet_mut(&mut self) -> &mut Planet {
        &mut self.planet
    }

    pub fn messages(&self) -> &[Message] {
        &self.planet.messages
    }

    pub fn evidence(&self) -> Option<&EvidenceBundle> {
        self.evidence.as_ref()
    }

    pub fn query_in_flight(&self) -> bool {
        self.active.is_some()
    }

    /// Start a query: append the user message and the single loading
    /// placeholder, clear stale evidence, and hand back the ticket plus
    /// the wire request carrying the session id.
    pub fn begin_query(
        &mut self,
        question: &str,
        session_id: &str,
    ) -> Result<(QueryTicket, QueryRequest), ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }
        if self.active.is_some() {
            return Err(ChatError::QueryInFlight);
        }

        self.planet.messages.push(Message::user(question));
        let placeholder = Message::loading();
        let placeholder_id = placeholder.id.clone();
        self.planet.messages.push(placeholder);
        self.evidence = None;
        self.pending_evidence = None;

        let ticket = QueryTicket {
            query_id: format!("query-{}-{}", now_millis(), short_suffix()),
            planet_id: self.planet.id.clone(),
        };
        self.active = Some(ActiveQuery {
            ticket: ticket.clone(),
            placeholder_id,
            started: Instant::now(),
        });
        self.flush()?;

        info!(query_id = %ticket.query_id, planet_id = %ticket.planet_id, "query submitted");
        Ok((ticket, QueryRequest::new(question, session_id)))
    }

    /// Apply a successful response. Returns the deferred UI tasks
    /// (typing completion, evidence reveal) for the driver to schedule.
    /// A stale ticket is a no-op.
    pub fn complete_query(
        &mut self,
        ticket: &QueryTicket,
        response: &QueryResponse,
    ) -> Result<Vec<UiTask>, StoreError> {
        let Some(active) = self.take_active(ticket) else {
            return Ok(Vec::new());
        };

        let elapsed = active.started.elapsed().as_secs_f64();
        let processing_time_seconds = (elapsed * 10.0).round() / 10.0;

        let records: Vec<SourceRecord> =
            response.sources.iter().map(|source| source.normalize()).collect();

        let mut answer = Message::ai(response.display_text());
        answer.citations = records.iter().map(|record| record.label.clone()).collect();
        answer.processing_time_seconds = Some(processing_time_seconds);
        answer.is_typing = true;
        let answer_id = answer.id.clone();
        let answer_len = answer.content.chars().count();

        self.planet
            .messages
            .retain(|message| message.id != active.placeholder_id);
        self.planet.messages.push(answer);

        // Held back until the reveal task fires so evidence never
        // flashes in before the answer text.
        let bundle = build_evidence(response, &records);
        self.pending_evidence = Some((ticket.query_id.clone(), bundle));
        self.evidence = None;
        self.flush()?;

        info!(
            query_id = %ticket.query_id,
            refusal = response.is_refusal(),
            sources = records.len(),
            "query completed in {processing_time_seconds}s"
        );

        Ok(vec![
            UiTask {
                planet_id: self.planet.id.clone(),
                delay: typing_delay(answer_len),
                effect: UiEffect::TypingDone {
                    message_id: answer_id,
                },
            },
            UiTask {
                planet_id: self.planet.id.clone(),
                delay: Duration::from_millis(EVIDENCE_REVEAL_MS),
                effect: UiEffect::RevealEvidence {
                    query_id: ticket.query_id.clone(),
                },
            },
        ])
    }

    /// Apply a failed response: drop the placeholder, append a single
    /// error-flagged message, and clear all evidence. Stale tickets are
    /// no-ops.
    pub fn fail_query(&mut self, ticket: &QueryTicket, error: &ApiError) -> Result<(), StoreError> {
        let Some(active) = self.take_active(ticket) else {
            return Ok(());
        };

        self.planet
            .messages
            .retain(|message| message.id != active.placeholder_id);
        self.planet.messages.push(Message::error(failure_message(error)));
        self.evidence = None;
        self.pending_evidence = None;
        self.flush()?;

        info!(query_id = %ticket.query_id, %error, "query failed");
        Ok(())
    }

    /// Apply a fired deferred task. Tasks belonging to another planet
    /// are dropped; upload expiry is not handled here.
    pub fn task_fired(&mut self, task: &UiTask) -> Result<(), StoreError> {
        if task.planet_id != self.planet.id {
            debug!(planet_id = %task.planet_id, "dropping task for inactive planet");
            return Ok(());
        }
        match &task.effect {
            UiEffect::TypingDone { message_id } => {
                if let Some(message) = self
                    .planet
                    .messages
                    .iter_mut()
                    .find(|message| message.id == *message_id)
                {
                    message.is_typing = false;
                    self.flush()?;
                }
            }
            UiEffect::RevealEvidence { query_id } => {
                if let Some((pending_id, bundle)) = self.pending_evidence.take() {
                    if pending_id == *query_id {
                        self.evidence = Some(bundle);
                    } else {
                        self.pending_evidence = Some((pending_id, bundle));
                    }
                }
            }
            UiEffect::ExpireUpload { .. } => {}
        }
        Ok(())
    }

    /// Record one ingested file on the planet's visible source list.
    pub fn add_source(&mut self, name: &str, chunks: u32) -> Result<(), StoreError> {
        self.planet.sources.push(SourceEntry {
            name: name.to_string(),
            chunks,
        });
        self.planet.source_count = self.planet.sources.len() as u32;
        self.flush()
    }

    /// Make another planet active. Any in-flight query keeps its old
    /// ticket and resolves as a no-op.
    pub fn switch_to(&mut self, planet: Planet) {
        debug!(from = %self.planet.id, to = %planet.id, "switching active planet");
        self.planet = planet;
        self.active = None;
        self.evidence = None;
        self.pending_evidence = None;
    }

    fn take_active(&mut self, ticket: &QueryTicket) -> Option<ActiveQuery> {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.ticket == *ticket && ticket.planet_id == self.planet.id);
        if !matches {
            debug!(query_id = %ticket.query_id, "discarding stale query completion");
            return None;
        }
        self.active.take()
    }

    fn flush(&self) -> Result<(), StoreError> {
        if self.planet.is_named() {
            self.store.upsert(&self.planet)?;
        }
        Ok(())
    }
}

fn build_evidence(response: &QueryResponse, records: &[SourceRecord]) -> EvidenceBundle {
    let cards = records
        .iter()
        .map(|record| EvidenceCard {
            filename: record.label.clone(),
            confidence_percent: record
                .score
                .map(|score| (score * 100.0).round() as u32)
                .unwrap_or(0),
            modality: record
                .modality
                .clone()
                .unwrap_or_else(|| "text".to_string()),
            page: record.page,
        })
        .collect::<Vec<_>>();

    EvidenceBundle {
        confidence: response.confidence.map(normalize_confidence).unwrap_or(0.0),
        source_count: cards.len() as u32,
        cards,
        conflicts_detected: response.has_conflicts || !response.conflicts.is_empty(),
        conflicts: response.conflicts.clone(),
    }
}

fn failure_message(error: &ApiError) -> String {
    if error.is_timeout() {
        return "This is taking longer than expected. The backend may still be reasoning over \
                your documents - please try asking again in a moment."
            .to_string();
    }
    if let Some(detail) = error.server_detail() {
        return detail.to_string();
    }
    if matches!(error, ApiError::Decode { .. }) {
        return "The server returned an unexpected response. Please try again.".to_string();
    }
    "Unable to reach the server. Check that the backend is running and try again.".to_string()
}
