//! Persisted planet store.
//!
//! Durable, local record of planet metadata and transcripts plus the
//! two fixed pointers (active planet, fallback session id). Single
//! writer per process; last-write-wins by planet id; history is a
//! bounded cache of the 20 most recent planets, not an archive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Older planets silently fall off the end of history.
pub const HISTORY_LIMIT: usize = 20;
/// Default name; planets keep it until the user names them, and a
/// planet is not persisted to history while it still carries it.
pub const UNTITLED_PLANET: &str = "Untitled Planet";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store_io {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store_serialize: {message}")]
    Serialize { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Planet {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Millis since epoch of the last mutation.
    pub timestamp: i64,
    #[serde(default)]
    pub source_count: u32,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl Planet {
    /// Fresh unnamed planet. Ids are minted once here and never reused.
    pub fn new() -> Self {
        Self {
            id: mint_planet_id(),
            session_id: None,
            name: UNTITLED_PLANET.to_string(),
            messages: Vec::new(),
            timestamp: now_millis(),
            source_count: 0,
            sources: Vec::new(),
        }
    }

    /// Named planets are eligible for the history list; sentinel-named
    /// ones are not.
    pub fn is_named(&self) -> bool {
        let trimmed = self.name.trim();
        !trimmed.is_empty() && trimmed != UNTITLED_PLANET
    }

    pub fn touch(&mut self) {
        self.timestamp = now_millis();
    }
}

impl Default for Planet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_typing: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::bare(MessageKind::User, content)
    }

    /// The single placeholder shown while a query is in flight.
    pub fn loading() -> Self {
        let mut message = Self::bare(MessageKind::Ai, "");
        message.is_loading = true;
        message
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::bare(MessageKind::Ai, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        let mut message = Self::bare(MessageKind::Ai, content);
        message.is_error = true;
        message
    }

    fn bare(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: mint_message_id(),
            kind,
            content: content.into(),
            timestamp: now_millis(),
            citations: Vec::new(),
            processing_time_seconds: None,
            is_loading: false,
            is_error: false,
            is_typing: false,
        }
    }
}

/// One ingested file visible in the planet's source list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    #[serde(default)]
    pub chunks: u32,
}

/// Injected persistence seam. All components read and write planets
/// through this contract; nothing bypasses it with direct storage
/// access.
pub trait StateStore {
    fn list(&self) -> Result<Vec<Planet>, StoreError>;
    fn find(&self, id: &str) -> Result<Option<Planet>, StoreError>;
    fn upsert(&self, planet: &Planet) -> Result<(), StoreError>;
    fn remove(&self, id: &str) -> Result<(), StoreError>;

    fn active_planet_id(&self) -> Result<Option<String>, StoreError>;
    fn set_active_planet_id(&self, id: Option<&str>) -> Result<(), StoreError>;

    fn fallback_session_id(&self) -> Result<Option<String>, StoreError>;
    fn set_fallback_session_id(&self, id: Option<&str>) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDoc {
    #[serde(default)]
    planets: Vec<Planet>,
    #[serde(default)]
    active_planet_id: Option<String>,
    #[serde(default)]
    fallback_session_id: Option<String>,
}

/// Single-document JSON store with atomic tmp+rename writes.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    doc: Mutex<StateDoc>,
}

impl JsonStateStore {
    /// Opens or creates the store file. A corrupt document is logged
    /// and replaced by an empty one on the next write; history is a
    /// bounded cache, so the loss is accepted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<StateDoc>(&bytes) {
                Ok(doc) => doc,
                Err(error) => {
                    warn!(path = %path.display(), %error, "planet history is corrupt, starting empty");
                    StateDoc::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => StateDoc::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    fn with_doc<T>(
        &self,
        mutate: impl FnOnce(&mut StateDoc) -> T,
    ) -> Result<T, StoreError> {
        let mut doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);
        let out = mutate(&mut doc);
        self.flush(&doc)?;
        Ok(out)
    }

    fn read_doc<T>(&self, read: impl FnOnce(&StateDoc) -> T) -> T {
        let doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);
        read(&doc)
    }

    fn flush(&self, doc: &StateDoc) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|error| StoreError::Serialize {
            message: error.to_string(),
        })?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, bytes).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl StateStore for JsonStateStore {
    fn list(&self) -> Result<Vec<Planet>, StoreError> {
        Ok(self.read_doc(|doc| doc.planets.clone()))
    }

    fn find(&self, id: &str) -> Result<Option<Planet>, StoreError> {
        Ok(self.read_doc(|doc| doc.planets.iter().find(|p| p.id == id).cloned()))
    }

    fn upsert(&self, planet: &Planet) -> Result<(), StoreError> {
        let mut planet = planet.clone();
        planet.touch();
        self.with_doc(|doc| {
            doc.planets.retain(|existing| existing.id != planet.id);
            doc.planets.insert(0, planet);
            doc.planets.truncate(HISTORY_LIMIT);
        })
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.with_doc(|doc| {
            let removed_session = doc
                .planets
                .iter()
                .find(|p| p.id == id)
                .and_then(|p| p.session_id.clone());
            doc.planets.retain(|p| p.id != id);
            if doc.active_planet_id.as_deref() == Some(id) {
                doc.active_planet_id = None;
            }
            // A deleted planet's session identity must never be reused
            // for future queries.
            if removed_session.is_some() && doc.fallback_session_id == removed_session {
                doc.fallback_session_id = None;
            }
        })
    }

    fn active_planet_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.read_doc(|doc| doc.active_planet_id.clone()))
    }

    fn set_active_planet_id(&self, id: Option<&str>) -> Result<(), StoreError> {
        self.with_doc(|doc| doc.active_planet_id = id.map(str::to_string))
    }

    fn fallback_session_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.read_doc(|doc| doc.fallback_session_id.clone()))
    }

    fn set_fallback_session_id(&self, id: Option<&str>) -> Result<(), StoreError> {
        self.with_doc(|doc| doc.fallback_session_id = id.map(str::to_string))
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn short_suffix() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple.chars().take(9).collect()
}

fn mint_planet_id() -> String {
    format!("planet-{}-{}", now_millis(), short_suffix())
}

fn mint_message_id() -> String {
    format!("msg-{}-{}", now_millis(), short_suffix())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn named(name: &str) -> Planet {
        let mut planet = Planet::new();
        planet.name = name.to_string();
        planet
    }

    fn open_store(dir: &tempfile::TempDir) -> JsonStateStore {
        JsonStateStore::open(dir.path().join("planets.json")).expect("store should open")
    }

    #[test]
    fn upsert_prepends_and_truncates_to_history_limit() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);

        for index in 0..25 {
            store
                .upsert(&named(&format!("Planet {index}")))
                .expect("upsert");
        }

        let history = store.list().expect("list");
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].name, "Planet 24");
        assert_eq!(history[HISTORY_LIMIT - 1].name, "Planet 5");
    }

    #[test]
    fn upsert_is_idempotent_by_id() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let planet = named("Kepler");

        store.upsert(&planet).expect("first upsert");
        store.upsert(&planet).expect("second upsert");

        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[test]
    fn rewriting_a_planet_moves_it_to_the_front() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let first = named("First");
        let second = named("Second");

        store.upsert(&first).expect("upsert first");
        store.upsert(&second).expect("upsert second");
        store.upsert(&first).expect("rewrite first");

        let history = store.list().expect("list");
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[1].id, second.id);
    }

    #[test]
    fn saved_planet_round_trips_through_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("planets.json");

        let mut planet = named("Roundtrip");
        planet.session_id = Some("session-1-abc".to_string());
        planet.messages.push(Message::user("hello"));
        planet.source_count = 2;
        planet.sources.push(SourceEntry {
            name: "notes.pdf".to_string(),
            chunks: 12,
        });

        {
            let store = JsonStateStore::open(&path).expect("store");
            store.upsert(&planet).expect("upsert");
        }

        let reloaded = JsonStateStore::open(&path)
            .expect("reopen")
            .find(&planet.id)
            .expect("find")
            .expect("planet should survive reload");
        assert_eq!(reloaded.id, planet.id);
        assert_eq!(reloaded.name, planet.name);
        assert_eq!(reloaded.messages, planet.messages);
        assert_eq!(reloaded.source_count, planet.source_count);
        assert_eq!(reloaded.sources, planet.sources);
    }

    #[test]
    fn corrupt_history_is_replaced_with_an_empty_document() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("planets.json");
        fs::write(&path, b"{ not json").expect("write corrupt file");

        let store = JsonStateStore::open(&path).expect("open despite corruption");
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn removing_the_fallback_sessions_planet_invalidates_the_fallback() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);

        let mut planet = named("Doomed");
        planet.session_id = Some("session-9-dead".to_string());
        store.upsert(&planet).expect("upsert");
        store
            .set_fallback_session_id(Some("session-9-dead"))
            .expect("set fallback");

        store.remove(&planet.id).expect("remove");

        assert_eq!(store.fallback_session_id().expect("fallback"), None);
        assert!(store.find(&planet.id).expect("find").is_none());
    }

    #[test]
    fn remove_clears_the_active_pointer_when_it_matches() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let planet = named("Active");

        store.upsert(&planet).expect("upsert");
        store
            .set_active_planet_id(Some(&planet.id))
            .expect("set active");
        store.remove(&planet.id).expect("remove");

        assert_eq!(store.active_planet_id().expect("active"), None);
    }

    #[test]
    fn unnamed_planets_report_not_named() {
        let planet = Planet::new();
        assert!(!planet.is_named());
        assert!(named("Kepler").is_named());
        assert!(!named("   ").is_named());
    }
}
