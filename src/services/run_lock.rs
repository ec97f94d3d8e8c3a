//! Per-battalion import lease
//!
//! Two imports against the same battalion must not interleave: later
//! batches of each run would miss the other run's inserts and the
//! duplicate detector would let near-duplicates through. The lease
//! serializes runs per organizational scope. A run that dies without
//! releasing (worker crash, abandoned job) is evicted after a fixed
//! timeout so the scope never wedges permanently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

/// Lease older than this counts as abandoned and may be taken over.
const ABANDONMENT_TIMEOUT_MINUTES: i64 = 15;

/// Runs without a battalion contend on this shared scope.
const UNSCOPED: &str = "__unscoped__";

pub static RUN_LOCK: Lazy<RunLock> = Lazy::new(RunLock::default);

#[derive(Debug, Clone)]
struct Lease {
    job_id: Uuid,
    acquired_at: DateTime<Utc>,
}

/// Releases the lease on drop, but only if this run still holds it
/// (an abandoned lease may have been taken over in the meantime).
#[derive(Debug)]
pub struct LeaseGuard {
    scope: String,
    job_id: Uuid,
    lock: RunLock,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.lock.release(&self.scope, self.job_id);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct LeaseHeld {
    pub holder: Uuid,
    pub held_for_minutes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RunLock {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

impl RunLock {
    fn scope_key(battalion: Option<&str>) -> String {
        battalion
            .map(|b| b.trim().to_lowercase())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| UNSCOPED.to_string())
    }

    /// Try to take the scope for a run. Fails with the current holder
    /// when a live lease exists; an abandoned lease is evicted.
    pub fn acquire(&self, battalion: Option<&str>, job_id: Uuid) -> Result<LeaseGuard, LeaseHeld> {
        self.acquire_at(battalion, job_id, Utc::now())
    }

    fn acquire_at(
        &self,
        battalion: Option<&str>,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LeaseGuard, LeaseHeld> {
        let scope = Self::scope_key(battalion);
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(&scope) {
            let age = now - lease.acquired_at;
            if age < Duration::minutes(ABANDONMENT_TIMEOUT_MINUTES) {
                return Err(LeaseHeld {
                    holder: lease.job_id,
                    held_for_minutes: age.num_minutes(),
                });
            }
        }
        leases.insert(
            scope.clone(),
            Lease {
                job_id,
                acquired_at: now,
            },
        );
        Ok(LeaseGuard {
            scope,
            job_id,
            lock: self.clone(),
        })
    }

    fn release(&self, scope: &str, job_id: Uuid) {
        let mut leases = self.leases.lock();
        if leases.get(scope).map(|l| l.job_id) == Some(job_id) {
            leases.remove(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_run_on_same_battalion_is_rejected() {
        let lock = RunLock::default();
        let first = Uuid::new_v4();
        let _guard = lock.acquire(Some("1º BPM"), first).unwrap();
        let err = lock.acquire(Some("1º bpm"), Uuid::new_v4()).unwrap_err();
        assert_eq!(err.holder, first);
    }

    #[test]
    fn test_different_battalions_run_concurrently() {
        let lock = RunLock::default();
        let _a = lock.acquire(Some("1º BPM"), Uuid::new_v4()).unwrap();
        assert!(lock.acquire(Some("2º BPM"), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_release_on_drop_frees_the_scope() {
        let lock = RunLock::default();
        {
            let _guard = lock.acquire(Some("1º BPM"), Uuid::new_v4()).unwrap();
        }
        assert!(lock.acquire(Some("1º BPM"), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_abandoned_lease_is_evicted_after_timeout() {
        let lock = RunLock::default();
        let stale = Uuid::new_v4();
        let start = Utc::now();
        let guard = lock.acquire_at(Some("1º BPM"), stale, start).unwrap();
        // Holder never released; 16 minutes later another run takes over
        let later = start + Duration::minutes(16);
        let fresh = Uuid::new_v4();
        let new_guard = lock.acquire_at(Some("1º BPM"), fresh, later).unwrap();
        // The stale guard's drop must not release the new holder's lease
        drop(guard);
        let err = lock.acquire_at(Some("1º BPM"), Uuid::new_v4(), later).unwrap_err();
        assert_eq!(err.holder, fresh);
        drop(new_guard);
    }

    #[test]
    fn test_unscoped_runs_share_one_lease() {
        let lock = RunLock::default();
        let _guard = lock.acquire(None, Uuid::new_v4()).unwrap();
        assert!(lock.acquire(None, Uuid::new_v4()).is_err());
        assert!(lock.acquire(Some("  "), Uuid::new_v4()).is_err());
    }
}
