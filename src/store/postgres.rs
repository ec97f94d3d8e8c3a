//! Postgres-backed property store (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::types::{
    Coordinates, ImportSession, NewProperty, PropertyRef, RowError, SessionStatus,
};

use super::{PropertyStore, StoreError, StoreResult};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Classify sqlx failures into the store taxonomy. Anything where the
/// write may or may not have landed maps to `Unavailable`.
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => StoreError::Unavailable(e.to_string()),
        other => StoreError::Backend(other.into()),
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<ImportSession> {
    let status_str: String = row.try_get("status").map_err(map_sqlx_error)?;
    let status = SessionStatus::from_str(&status_str).ok_or_else(|| {
        StoreError::Backend(anyhow::anyhow!("status de sessão inválido: {status_str}"))
    })?;
    Ok(ImportSession {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        filename: row.try_get("filename").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        total_properties: row.try_get("total_properties").map_err(map_sqlx_error)?,
        success_count: row.try_get("success_count").map_err(map_sqlx_error)?,
        error_count: row.try_get("error_count").map_err(map_sqlx_error)?,
        skipped_count: row.try_get("skipped_count").map_err(map_sqlx_error)?,
        status,
    })
}

#[async_trait]
impl PropertyStore for PgStore {
    async fn list_active_properties(&self) -> StoreResult<Vec<PropertyRef>> {
        let rows = sqlx::query(
            r#"SELECT id, name, latitude, longitude FROM properties WHERE deleted_at IS NULL"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(PropertyRef {
                    id: row.try_get("id").map_err(map_sqlx_error)?,
                    name: row.try_get("name").map_err(map_sqlx_error)?,
                    coordinates: Coordinates {
                        lat: row.try_get("latitude").map_err(map_sqlx_error)?,
                        lng: row.try_get("longitude").map_err(map_sqlx_error)?,
                    },
                })
            })
            .collect()
    }

    async fn insert_property(&self, property: &NewProperty) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let r = &property.record;
        sqlx::query(
            r#"INSERT INTO properties (
                id, name, cidade, owner_name, latitude, longitude,
                bairro, owner_phone, owner_rg, equipe, numero_placa,
                description, contact_name, contact_phone, contact_observations,
                observations, activity, has_cameras, cameras_count,
                has_wifi, wifi_password, residents_count, cadastro_date,
                import_session_id, created_by, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, NOW()
            )"#,
        )
        .bind(id)
        .bind(&r.name)
        .bind(&r.cidade)
        .bind(&r.owner_name)
        .bind(r.latitude)
        .bind(r.longitude)
        .bind(&r.bairro)
        .bind(&r.owner_phone)
        .bind(&r.owner_rg)
        .bind(&r.equipe)
        .bind(&r.numero_placa)
        .bind(&r.description)
        .bind(&r.contact_name)
        .bind(&r.contact_phone)
        .bind(&r.contact_observations)
        .bind(&r.observations)
        .bind(&r.activity)
        .bind(r.has_cameras)
        .bind(r.cameras_count)
        .bind(r.has_wifi)
        .bind(&r.wifi_password)
        .bind(r.residents_count)
        .bind(r.cadastro_date)
        .bind(property.session_id)
        .bind(property.created_by)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn soft_delete_by_session(
        &self,
        session_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let result = sqlx::query(
            r#"UPDATE properties SET deleted_at = $1
               WHERE import_session_id = $2 AND deleted_at IS NULL"#,
        )
        .bind(deleted_at)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_active_by_session(&self, session_id: Uuid) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM properties
               WHERE import_session_id = $1 AND deleted_at IS NULL"#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count as usize)
    }

    async fn create_session(&self, session: &ImportSession) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO import_sessions (
                id, user_id, filename, created_at, total_properties,
                success_count, error_count, skipped_count, status, errors
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '[]'::jsonb)"#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.filename)
        .bind(session.created_at)
        .bind(session.total_properties)
        .bind(session.success_count)
        .bind(session.error_count)
        .bind(session.skipped_count)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<ImportSession> {
        let row = sqlx::query(
            r#"SELECT id, user_id, filename, created_at, total_properties,
                      success_count, error_count, skipped_count, status
               FROM import_sessions WHERE id = $1"#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::NotFound)?;
        session_from_row(&row)
    }

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<ImportSession>> {
        let rows = sqlx::query(
            r#"SELECT id, user_id, filename, created_at, total_properties,
                      success_count, error_count, skipped_count, status
               FROM import_sessions WHERE user_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(session_from_row).collect()
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
        let errors_json = serde_json::to_value(errors)
            .map_err(|e| StoreError::Backend(e.into()))?;
        let result = sqlx::query(
            r#"UPDATE import_sessions
               SET status = $1, success_count = $2, error_count = $3,
                   skipped_count = $4, errors = $5
               WHERE id = $6"#,
        )
        .bind(status.as_str())
        .bind(success_count)
        .bind(error_count)
        .bind(skipped_count)
        .bind(errors_json)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> StoreResult<()> {
        let result = sqlx::query(r#"UPDATE import_sessions SET status = $1 WHERE id = $2"#)
            .bind(status.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn session_errors(&self, session_id: Uuid) -> StoreResult<Vec<RowError>> {
        let errors_json: serde_json::Value =
            sqlx::query_scalar(r#"SELECT errors FROM import_sessions WHERE id = $1"#)
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or(StoreError::NotFound)?;
        serde_json::from_value(errors_json).map_err(|e| StoreError::Backend(e.into()))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
