//! In-memory property store for tests and development
//!
//! Deterministic, no database. Also supports injecting failures so the
//! runner's error paths can be exercised.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{ImportSession, NewProperty, PropertyRef, RowError, SessionStatus};

use super::{PropertyStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredProperty {
    id: Uuid,
    property: NewProperty,
    deleted_at: Option<DateTime<Utc>>,
}

/// Failure to inject on a future `insert_property` call, keyed by the
/// 1-based call number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Conflict,
    Unavailable,
}

#[derive(Default)]
struct Inner {
    properties: Vec<StoredProperty>,
    sessions: HashMap<Uuid, ImportSession>,
    session_errors: HashMap<Uuid, Vec<RowError>>,
    insert_calls: usize,
    failures: HashMap<usize, InjectedFailure>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an active property so it shows up in duplicate detection.
    pub fn seed_property(&self, name: &str, lat: f64, lng: f64) -> Uuid {
        use crate::types::NormalizedProperty;
        let id = Uuid::new_v4();
        let record = NormalizedProperty {
            name: name.to_string(),
            cidade: "Curitiba".to_string(),
            owner_name: "seed".to_string(),
            latitude: lat,
            longitude: lng,
            bairro: None,
            owner_phone: None,
            owner_rg: None,
            equipe: None,
            numero_placa: None,
            description: None,
            contact_name: None,
            contact_phone: None,
            contact_observations: None,
            observations: None,
            activity: None,
            has_cameras: false,
            cameras_count: 0,
            has_wifi: false,
            wifi_password: None,
            residents_count: 0,
            cadastro_date: chrono::Utc::now().date_naive(),
        };
        self.inner.lock().properties.push(StoredProperty {
            id,
            property: NewProperty {
                record,
                session_id: Uuid::nil(),
                created_by: Uuid::nil(),
            },
            deleted_at: None,
        });
        id
    }

    /// Make the n-th `insert_property` call (1-based) fail.
    pub fn fail_insert(&self, call_number: usize, failure: InjectedFailure) {
        self.inner.lock().failures.insert(call_number, failure);
    }

    pub fn active_property_count(&self) -> usize {
        self.inner
            .lock()
            .properties
            .iter()
            .filter(|p| p.deleted_at.is_none())
            .count()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .properties
            .iter()
            .filter(|p| p.deleted_at.is_none())
            .map(|p| p.property.record.name.clone())
            .collect()
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn list_active_properties(&self) -> StoreResult<Vec<PropertyRef>> {
        Ok(self
            .inner
            .lock()
            .properties
            .iter()
            .filter(|p| p.deleted_at.is_none())
            .map(|p| PropertyRef {
                id: p.id,
                name: p.property.record.name.clone(),
                coordinates: p.property.record.coordinates(),
            })
            .collect())
    }

    async fn insert_property(&self, property: &NewProperty) -> StoreResult<Uuid> {
        let mut inner = self.inner.lock();
        inner.insert_calls += 1;
        let call = inner.insert_calls;
        match inner.failures.get(&call).copied() {
            Some(InjectedFailure::Conflict) => {
                return Err(StoreError::Conflict("violação de unicidade".to_string()));
            }
            Some(InjectedFailure::Unavailable) => {
                return Err(StoreError::Unavailable("conexão perdida".to_string()));
            }
            None => {}
        }
        let id = Uuid::new_v4();
        inner.properties.push(StoredProperty {
            id,
            property: property.clone(),
            deleted_at: None,
        });
        Ok(id)
    }

    async fn soft_delete_by_session(
        &self,
        session_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let mut marked = 0;
        for stored in inner.properties.iter_mut() {
            if stored.property.session_id == session_id && stored.deleted_at.is_none() {
                stored.deleted_at = Some(deleted_at);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn count_active_by_session(&self, session_id: Uuid) -> StoreResult<usize> {
        Ok(self
            .inner
            .lock()
            .properties
            .iter()
            .filter(|p| p.property.session_id == session_id && p.deleted_at.is_none())
            .count())
    }

    async fn create_session(&self, session: &ImportSession) -> StoreResult<()> {
        self.inner.lock().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<ImportSession> {
        self.inner
            .lock()
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<ImportSession>> {
        let mut sessions: Vec<ImportSession> = self
            .inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn finalize_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        success_count: i32,
        error_count: i32,
        skipped_count: i32,
        errors: &[RowError],
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound)?;
        session.status = status;
        session.success_count = success_count;
        session.error_count = error_count;
        session.skipped_count = skipped_count;
        inner.session_errors.insert(session_id, errors.to_vec());
        Ok(())
    }

    async fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound)?;
        session.status = status;
        Ok(())
    }

    async fn session_errors(&self, session_id: Uuid) -> StoreResult<Vec<RowError>> {
        let inner = self.inner.lock();
        if !inner.sessions.contains_key(&session_id) {
            return Err(StoreError::NotFound);
        }
        Ok(inner
            .session_errors
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NormalizedProperty;

    fn new_property(name: &str, session_id: Uuid) -> NewProperty {
        NewProperty {
            record: NormalizedProperty {
                name: name.to_string(),
                cidade: "Curitiba".to_string(),
                owner_name: "João".to_string(),
                latitude: -25.4,
                longitude: -49.2,
                bairro: None,
                owner_phone: None,
                owner_rg: None,
                equipe: None,
                numero_placa: None,
                description: None,
                contact_name: None,
                contact_phone: None,
                contact_observations: None,
                observations: None,
                activity: None,
                has_cameras: false,
                cameras_count: 0,
                has_wifi: false,
                wifi_password: None,
                residents_count: 0,
                cadastro_date: chrono::Utc::now().date_naive(),
            },
            session_id,
            created_by: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn insert_then_list_active() {
        let store = MemoryStore::new();
        let session = Uuid::new_v4();
        store.insert_property(&new_property("Sítio A", session)).await.unwrap();
        let active = store.list_active_properties().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Sítio A");
    }

    #[tokio::test]
    async fn soft_delete_only_touches_own_session() {
        let store = MemoryStore::new();
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.insert_property(&new_property("A", mine)).await.unwrap();
        store.insert_property(&new_property("B", mine)).await.unwrap();
        store.insert_property(&new_property("C", other)).await.unwrap();

        let marked = store.soft_delete_by_session(mine, Utc::now()).await.unwrap();
        assert_eq!(marked, 2);
        assert_eq!(store.active_property_count(), 1);
        // Repeating the undo marks nothing new
        let again = store.soft_delete_by_session(mine, Utc::now()).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn injected_failure_hits_the_right_call() {
        let store = MemoryStore::new();
        store.fail_insert(2, InjectedFailure::Unavailable);
        let session = Uuid::new_v4();
        assert!(store.insert_property(&new_property("A", session)).await.is_ok());
        let err = store.insert_property(&new_property("B", session)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.insert_property(&new_property("C", session)).await.is_ok());
    }
}
