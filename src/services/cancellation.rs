//! Cooperative cancellation for import runs
//!
//! The orchestrator checks the registry before dispatching each batch.
//! Cancellation is owner-verified: only the user who submitted the run
//! may stop it. An RAII guard removes the entry when the run finishes.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global registry singleton
pub static CANCELLATION: Lazy<RunCancellation> = Lazy::new(RunCancellation::default);

struct RunEntry {
    token: CancellationToken,
    owner_id: Uuid,
}

/// Held for the duration of run processing; dropping it removes the run
/// from the registry.
pub struct RunGuard {
    job_id: Uuid,
    registry: RunCancellation,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CancelError {
    /// Caller did not submit this run
    NotOwner,
}

#[derive(Clone, Default)]
pub struct RunCancellation {
    runs: Arc<Mutex<HashMap<Uuid, RunEntry>>>,
}

impl RunCancellation {
    /// Register a run under its owner. Keep the returned guard alive
    /// until the run settles.
    pub fn register(&self, job_id: Uuid, owner_id: Uuid) -> RunGuard {
        let token = CancellationToken::new();
        self.runs.lock().insert(job_id, RunEntry { token, owner_id });
        RunGuard {
            job_id,
            registry: self.clone(),
        }
    }

    /// Request cancellation.
    ///
    /// - `Ok(true)` — run found and flagged
    /// - `Ok(false)` — run not found (already finished or not started)
    /// - `Err(NotOwner)` — run belongs to a different user
    pub fn cancel(&self, job_id: &Uuid, caller_id: Uuid) -> Result<bool, CancelError> {
        let runs = self.runs.lock();
        match runs.get(job_id) {
            Some(entry) => {
                if entry.owner_id != caller_id {
                    return Err(CancelError::NotOwner);
                }
                entry.token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flag a run that is still sitting in the work queue. When the
    /// worker picks it up, the first `is_cancelled` check short-circuits
    /// the whole run.
    pub fn pre_cancel(&self, job_id: Uuid, caller_id: Uuid) {
        let token = CancellationToken::new();
        token.cancel();
        self.runs.lock().insert(
            job_id,
            RunEntry {
                token,
                owner_id: caller_id,
            },
        );
    }

    /// Hot path: called once per batch inside the orchestrator loop.
    pub fn is_cancelled(&self, job_id: &Uuid) -> bool {
        self.runs
            .lock()
            .get(job_id)
            .map_or(false, |e| e.token.is_cancelled())
    }

    pub fn remove(&self, job_id: &Uuid) {
        self.runs.lock().remove(job_id);
    }

    #[cfg(test)]
    fn contains(&self, job_id: &Uuid) -> bool {
        self.runs.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_run_is_not_cancelled() {
        let reg = RunCancellation::default();
        let job_id = Uuid::new_v4();
        let _guard = reg.register(job_id, Uuid::new_v4());
        assert!(!reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_owner_can_cancel() {
        let reg = RunCancellation::default();
        let job_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let _guard = reg.register(job_id, owner);
        assert_eq!(reg.cancel(&job_id, owner), Ok(true));
        assert!(reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_non_owner_is_rejected() {
        let reg = RunCancellation::default();
        let job_id = Uuid::new_v4();
        let _guard = reg.register(job_id, Uuid::new_v4());
        assert_eq!(reg.cancel(&job_id, Uuid::new_v4()), Err(CancelError::NotOwner));
        assert!(!reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_cancel_unknown_run_returns_false() {
        let reg = RunCancellation::default();
        assert_eq!(reg.cancel(&Uuid::new_v4(), Uuid::new_v4()), Ok(false));
    }

    #[test]
    fn test_pre_cancel_short_circuits_queued_run() {
        let reg = RunCancellation::default();
        let job_id = Uuid::new_v4();
        reg.pre_cancel(job_id, Uuid::new_v4());
        assert!(reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_guard_drop_cleans_up() {
        let reg = RunCancellation::default();
        let job_id = Uuid::new_v4();
        {
            let _guard = reg.register(job_id, Uuid::new_v4());
            assert!(reg.contains(&job_id));
        }
        assert!(!reg.contains(&job_id));
    }
}
