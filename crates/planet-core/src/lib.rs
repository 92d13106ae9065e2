//! Client-side core of the Planet retrieval workspace: the persisted
//! planet store, session identity, the query state machine, upload
//! tracking, and workspace switching.
//!
//! Components never touch storage directly; everything goes through the
//! [`StateStore`] trait so retention and last-write-wins rules stay
//! centrally enforced and unit-testable.

pub mod chat;
pub mod nav;
pub mod session;
pub mod store;
pub mod tasks;
pub mod uploads;

pub use chat::{ChatController, ChatError, EvidenceBundle, EvidenceCard, QueryTicket};
pub use nav::{ExitDecision, ExitResolution, NameError, SwitchController, SwitchError};
pub use session::SessionResolver;
pub use store::{
    HISTORY_LIMIT, JsonStateStore, Message, MessageKind, Planet, SourceEntry, StateStore,
    StoreError, UNTITLED_PLANET,
};
pub use tasks::{UiEffect, UiTask};
pub use uploads::{UploadCoordinator, UploadError, UploadStatus, UploadTask};
