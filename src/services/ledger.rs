//! Import session ledger
//!
//! The session is the only marker tying persisted properties back to
//! the CSV run that created them, so undo lives here: soft-delete every
//! active property the session created, then mark the session terminal.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthInfo;
use crate::store::{PropertyStore, StoreError};
use crate::types::{ImportSession, SessionStatus, UndoOutcome, UndoPreview};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sessão de importação não encontrada")]
    SessionNotFound,

    #[error("sessão já desfeita")]
    AlreadyUndone,

    #[error("apenas administradores podem desfazer uma importação")]
    Forbidden,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => LedgerError::SessionNotFound,
            other => LedgerError::Store(other),
        }
    }
}

pub struct SessionLedger {
    store: Arc<dyn PropertyStore>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Self { store }
    }

    /// Open a session before the job is queued, so the submitter gets
    /// the session id back immediately.
    pub async fn begin(
        &self,
        user_id: Uuid,
        filename: &str,
        total_properties: i32,
    ) -> Result<ImportSession, LedgerError> {
        let session = ImportSession {
            id: Uuid::new_v4(),
            user_id,
            filename: filename.to_string(),
            created_at: Utc::now(),
            total_properties,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            status: SessionStatus::InProgress,
        };
        self.store.create_session(&session).await?;
        info!(session_id = %session.id, %user_id, filename, "Import session opened");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<ImportSession, LedgerError> {
        Ok(self.store.get_session(session_id).await?)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ImportSession>, LedgerError> {
        Ok(self.store.list_sessions(user_id).await?)
    }

    /// What an undo would delete, for the operator's confirmation step.
    pub async fn undo_preview(&self, session_id: Uuid) -> Result<UndoPreview, LedgerError> {
        let session = self.store.get_session(session_id).await?;
        if session.status == SessionStatus::Undone {
            return Err(LedgerError::AlreadyUndone);
        }
        let active_count = self.store.count_active_by_session(session_id).await?;
        Ok(UndoPreview {
            session_id,
            owner: session.user_id,
            created_at: session.created_at,
            active_count,
            success_count: session.success_count,
        })
    }

    /// Soft-delete the whole run. Properties already deleted by
    /// unrelated action are skipped, not an error. Terminal: an undone
    /// session cannot be replayed or un-undone.
    pub async fn undo(
        &self,
        session_id: Uuid,
        caller: &AuthInfo,
    ) -> Result<UndoOutcome, LedgerError> {
        if !caller.is_admin() {
            return Err(LedgerError::Forbidden);
        }
        let session = self.store.get_session(session_id).await?;
        if session.status == SessionStatus::Undone {
            return Err(LedgerError::AlreadyUndone);
        }
        let undone_count = self
            .store
            .soft_delete_by_session(session_id, Utc::now())
            .await?;
        self.store
            .set_session_status(session_id, SessionStatus::Undone)
            .await?;
        info!(%session_id, undone_count, caller = %caller.user_id, "Import session undone");
        Ok(UndoOutcome {
            session_id,
            undone_count,
        })
    }
}
