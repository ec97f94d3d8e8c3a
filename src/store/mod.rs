//! Property store abstraction
//!
//! The import pipeline never talks to Postgres directly — it goes through
//! the `PropertyStore` trait so the whole pipeline runs against the
//! in-memory backend in tests (deterministic, no database).
//!
//! Backends:
//! - `PgStore` — production, sqlx/Postgres
//! - `MemoryStore` — tests and development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ImportSession, NewProperty, PropertyRef, RowError, SessionStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store failure taxonomy. The runner treats these differently:
/// `Conflict` charges the single row as a `DATABASE_ERROR`, while
/// `Unavailable` means the outcome was not observed at all and the rest
/// of the batch takes the pessimistic `CRITICAL_ERROR` path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registro não encontrado")]
    NotFound,

    #[error("conflito de dados: {0}")]
    Conflict(String),

    /// Connection-level failure. The fate of an in-flight write is
    /// unknown when this comes back.
    #[error("armazenamento indisponível: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Active (non-deleted) properties, as the duplicate detector sees
    /// them at the start of a run.
    async fn list_active_properties(&self) -> StoreResult<Vec<PropertyRef>>;

    /// Persist one property. Returns the new record's id.
    async fn insert_property(&self, property: &NewProperty) -> StoreResult<Uuid>;

    /// Soft-delete every active property created by the given session.
    /// Returns how many records were marked.
    async fn soft_delete_by_session(
        &self,
        session_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Active property count for a session (undo preview).
    async fn count_active_by_session(&self, session_id: Uuid) -> StoreResult<usize>;

    // --- Import session ledger ---

    async fn create_session(&self, session: &ImportSession) -> StoreResult<()>;

    async fn get_session(&self, session_id: Uuid) -> StoreResult<ImportSession>;

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<ImportSession>>;

    /// Close a session with its final counts, status and row errors.
    async fn finalize_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        success_count: i32,
        error_count: i32,
        skipped_count: i32,
        errors: &[RowError],
    ) -> StoreResult<()>;

    async fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()>;

    /// Row errors recorded when the session was finalized.
    async fn session_errors(&self, session_id: Uuid) -> StoreResult<Vec<RowError>>;

    fn name(&self) -> &'static str;
}
