//! Session identity resolution.
//!
//! Maps the active planet to a backend session id. Pure pointer
//! maintenance over the store; never calls the network and cannot fail
//! offline beyond a storage write error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{StateStore, StoreError, now_millis, short_suffix};

#[derive(Debug)]
pub struct SessionResolver<S: StateStore> {
    store: Arc<S>,
}

impl<S: StateStore> SessionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Session id queries and uploads must carry.
    ///
    /// The active planet's bound session wins; otherwise the last-used
    /// global session; otherwise a fresh one is minted and persisted as
    /// the global fallback.
    pub fn active_session_id(&self) -> Result<String, StoreError> {
        if let Some(active_id) = self.store.active_planet_id()?
            && let Some(planet) = self.store.find(&active_id)?
            && let Some(session_id) = planet.session_id
        {
            return Ok(session_id);
        }

        if let Some(fallback) = self.store.fallback_session_id()? {
            return Ok(fallback);
        }

        let minted = mint_session_id();
        debug!(session_id = %minted, "minted fallback session");
        self.store.set_fallback_session_id(Some(&minted))?;
        Ok(minted)
    }

    /// Mint a new session and make it the global fallback.
    pub fn create_session(&self) -> Result<String, StoreError> {
        let minted = mint_session_id();
        self.store.set_fallback_session_id(Some(&minted))?;
        Ok(minted)
    }

    /// Associate a session with a planet. Pure association: the planet
    /// record owns the binding, the resolver only maintains pointers.
    pub fn bind(&self, planet_id: &str, session_id: &str) -> Result<(), StoreError> {
        if let Some(mut planet) = self.store.find(planet_id)? {
            planet.session_id = Some(session_id.to_string());
            self.store.upsert(&planet)?;
        } else {
            warn!(%planet_id, "bind target not in history, association dropped");
        }
        Ok(())
    }
}

pub(crate) fn mint_session_id() -> String {
    format!("session-{}-{}", now_millis(), short_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonStateStore, Planet};
    use tempfile::tempdir;

    fn store(dir: &tempfile::TempDir) -> Arc<JsonStateStore> {
        Arc::new(JsonStateStore::open(dir.path().join("planets.json")).expect("store"))
    }

    #[test]
    fn bound_session_of_the_active_planet_wins() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        let resolver = SessionResolver::new(Arc::clone(&store));

        let mut planet = Planet::new();
        planet.name = "Kepler".to_string();
        planet.session_id = Some("session-1-bound".to_string());
        store.upsert(&planet).expect("upsert");
        store
            .set_active_planet_id(Some(&planet.id))
            .expect("set active");
        store
            .set_fallback_session_id(Some("session-0-global"))
            .expect("set fallback");

        assert_eq!(
            resolver.active_session_id().expect("session"),
            "session-1-bound"
        );
    }

    #[test]
    fn falls_back_to_the_global_session_when_nothing_is_bound() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        let resolver = SessionResolver::new(Arc::clone(&store));
        store
            .set_fallback_session_id(Some("session-0-global"))
            .expect("set fallback");

        assert_eq!(
            resolver.active_session_id().expect("session"),
            "session-0-global"
        );
    }

    #[test]
    fn mints_and_persists_a_session_when_none_exists() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        let resolver = SessionResolver::new(Arc::clone(&store));

        let minted = resolver.active_session_id().expect("session");
        assert!(minted.starts_with("session-"));

        // Resolution is stable: the minted id became the fallback.
        assert_eq!(resolver.active_session_id().expect("session"), minted);
        assert_eq!(
            store.fallback_session_id().expect("fallback"),
            Some(minted)
        );
    }

    #[test]
    fn binding_an_unknown_planet_does_not_create_a_record() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        let resolver = SessionResolver::new(Arc::clone(&store));

        resolver
            .bind("planet-0-missing", "session-2-fresh")
            .expect("bind");

        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn bind_updates_the_planet_record() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir);
        let resolver = SessionResolver::new(Arc::clone(&store));

        let mut planet = Planet::new();
        planet.name = "Kepler".to_string();
        store.upsert(&planet).expect("upsert");

        resolver.bind(&planet.id, "session-2-fresh").expect("bind");

        let rebound = store.find(&planet.id).expect("find").expect("planet");
        assert_eq!(rebound.session_id.as_deref(), Some("session-2-fresh"));
    }
}
