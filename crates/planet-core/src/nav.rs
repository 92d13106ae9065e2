//! Workspace switching: rename validation, rename-as-creation, and the
//! unsaved-work exit prompt.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::store::{Planet, StateStore, StoreError, UNTITLED_PLANET};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("planet name must not be empty")]
    Empty,
    #[error("choose a name other than the default")]
    Sentinel,
    #[error("a planet named '{name}' already exists")]
    Duplicate { name: String },
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to do when the user tries to navigate away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Saved already, or nothing worth keeping: leave immediately.
    Proceed,
    /// Unsaved work on board: ask first.
    PromptUnsaved,
}

/// The user's answer to the unsaved-work prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitResolution {
    Discard,
    SaveThenExit,
}

/// Governs navigation between planets. Renames and activation go
/// through here so the store and the session resolver stay consistent.
#[derive(Debug)]
pub struct SwitchController<S: StateStore> {
    store: Arc<S>,
}

impl<S: StateStore> SwitchController<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Rename acceptance: trimmed, non-sentinel, and unique against
    /// every other planet's current name (case-sensitive exact match).
    /// Returns the accepted name; no state is mutated on rejection.
    pub fn validate_name(&self, name: &str, planet_id: &str) -> Result<String, SwitchError> {
        let existing = self.store.list()?;
        validate_planet_name(name, &existing, planet_id).map_err(SwitchError::from)
    }

    /// Accept a rename. Naming is the act of creation: the planet gets
    /// a session binding if it lacks one and lands in history.
    pub fn rename(&self, planet: &mut Planet, name: &str) -> Result<(), SwitchError> {
        let accepted = self.validate_name(name, &planet.id)?;
        planet.name = accepted;
        if planet.session_id.is_none() {
            planet.session_id = Some(crate::session::mint_session_id());
        }
        self.store.upsert(planet)?;
        info!(planet_id = %planet.id, name = %planet.name, "planet renamed");
        Ok(())
    }

    /// A planet is unsaved when history does not know its id and it
    /// holds at least one message.
    pub fn request_exit(&self, planet: &Planet) -> Result<ExitDecision, StoreError> {
        if planet.messages.is_empty() || self.store.find(&planet.id)?.is_some() {
            return Ok(ExitDecision::Proceed);
        }
        Ok(ExitDecision::PromptUnsaved)
    }

    /// Resolve the prompt. `SaveThenExit` requires an accepted name on
    /// the planet (rename first); `Discard` leaves no trace.
    pub fn resolve_exit(
        &self,
        planet: &mut Planet,
        resolution: ExitResolution,
        name: Option<&str>,
    ) -> Result<(), SwitchError> {
        match resolution {
            ExitResolution::Discard => Ok(()),
            ExitResolution::SaveThenExit => {
                if let Some(name) = name {
                    self.rename(planet, name)
                } else if planet.is_named() {
                    self.store.upsert(planet)?;
                    Ok(())
                } else {
                    Err(SwitchError::Name(NameError::Sentinel))
                }
            }
        }
    }

    /// Point the store's active pointer at a planet (or clear it for a
    /// fresh blank one). The session resolver reads identity through
    /// this pointer, so the switch is atomic with the navigation.
    pub fn activate(&self, planet_id: Option<&str>) -> Result<(), StoreError> {
        self.store.set_active_planet_id(planet_id)
    }
}

/// Pure rename rule shared by the controller and anything that wants to
/// pre-validate in the UI.
pub fn validate_planet_name(
    name: &str,
    existing: &[Planet],
    planet_id: &str,
) -> Result<String, NameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if trimmed == UNTITLED_PLANET {
        return Err(NameError::Sentinel);
    }
    let duplicate = existing
        .iter()
        .any(|planet| planet.id != planet_id && planet.name == trimmed);
    if duplicate {
        return Err(NameError::Duplicate {
            name: trimmed.to_string(),
        });
    }
    Ok(trimmed.to_string())
}
