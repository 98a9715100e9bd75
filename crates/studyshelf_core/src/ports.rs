//! crates/studyshelf_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to stay independent of the hosted backend that actually stores rows,
//! blobs, and sessions.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    LocalFile, NewNote, NoteFilter, NotePatch, NoteRecord, RoleRecord, Session, SessionEvent,
    TransferProgress, UserRole,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Session changes pushed by the auth provider. Dropping the stream releases
/// the underlying subscription.
pub type SessionEvents = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// Byte-level progress for one blob transfer. The stream ends when the
/// transfer completes; an `Err` item terminates it early.
pub type TransferEvents = Pin<Box<dyn Stream<Item = PortResult<TransferProgress>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The currently active session, if any. `None` means signed out.
    async fn current_session(&self) -> PortResult<Option<Session>>;

    /// Subscribes to session-change notifications.
    fn subscribe(&self) -> SessionEvents;

    async fn sign_out(&self) -> PortResult<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_role(&self, user_id: Uuid) -> PortResult<Option<RoleRecord>>;

    async fn insert_role(&self, record: &RoleRecord) -> PortResult<()>;

    async fn update_role(&self, user_id: Uuid, role: UserRole) -> PortResult<()>;

    async fn set_blocked(&self, user_id: Uuid, blocked: bool) -> PortResult<()>;

    async fn list_roles(&self) -> PortResult<Vec<RoleRecord>>;
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn insert_note(&self, note: NewNote) -> PortResult<NoteRecord>;

    /// Notes newest-first, optionally restricted to one semester.
    async fn list_notes(&self, filter: NoteFilter) -> PortResult<Vec<NoteRecord>>;

    async fn update_note(&self, id: Uuid, patch: NotePatch) -> PortResult<()>;

    async fn set_pinned(&self, id: Uuid, pinned: bool) -> PortResult<()>;

    async fn delete_note(&self, id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams `file` to the store under `key`, authorized by the session's
    /// access token. Returns a lazy stream of transfer progress that ends
    /// when the object is fully stored.
    async fn upload(
        &self,
        key: &str,
        file: &LocalFile,
        access_token: &str,
    ) -> PortResult<TransferEvents>;

    /// The publicly retrievable URL for an object key.
    fn public_url(&self, key: &str) -> String;

    async fn remove(&self, keys: &[String], access_token: &str) -> PortResult<()>;
}
