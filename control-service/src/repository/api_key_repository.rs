//! # API Key Repository
//!
//! PostgreSQL access for worker API keys: Bearer authentication lookups,
//! usage counters, and the create/regenerate/delete lifecycle with its
//! audit events.

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::ApiKey;
use crate::domain::events::{AuditEvent, AuditEventType};
use crate::domain::token_codec::generate_api_key;
use crate::repository::audit_repository::append_with;
use crate::repository::user_repository::map_unique_violation;

const KEY_COLUMNS: &str = "id, name, key, scopes, is_active, description, last_used, \
     usage_count, config_version, created_at, updated_at";

// =============================================================================
// API KEY REPOSITORY
// =============================================================================

/// Repository for API key rows.
#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bearer authentication lookup: the key value must match an active row.
    pub async fn find_active_by_key(&self, key: &str) -> Result<Option<ApiKey>, ApiError> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key = $1 AND is_active = TRUE");
        sqlx::query_as::<_, ApiKey>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Active key bound to a worker row, for outbound cache-clear calls.
    pub async fn find_active_for_worker(&self, worker_id: Uuid) -> Result<Option<ApiKey>, ApiError> {
        let sql = format!(
            r#"
            SELECT {KEY_COLUMNS} FROM api_keys k
            WHERE k.is_active = TRUE
              AND k.id = (SELECT api_key_id FROM workers WHERE id = $1)
            "#
        );
        sqlx::query_as::<_, ApiKey>(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Bumps the usage counters. Fire-and-forget on the hot path.
    pub async fn track_usage(&self, key_id: Uuid) -> Result<(), ApiError> {
        sqlx::query("UPDATE api_keys SET last_used = NOW(), usage_count = usage_count + 1 WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;
        Ok(())
    }

    /// Creates a key, auto-generating the value when absent, and audits the
    /// creation in the same transaction.
    #[instrument(skip(self, key), fields(name = %name))]
    pub async fn create(
        &self,
        name: &str,
        scopes: &str,
        description: Option<&str>,
        key: Option<String>,
    ) -> Result<ApiKey, ApiError> {
        let auto_generated = key.is_none();
        let key_value = key.unwrap_or_else(generate_api_key);

        let sql = format!(
            r#"
            INSERT INTO api_keys (id, name, key, scopes, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {KEY_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let created: ApiKey = sqlx::query_as::<_, ApiKey>(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(&key_value)
            .bind(scopes)
            .bind(description)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique_violation("API key value already exists"))?;

        let audit = AuditEvent::new(AuditEventType::ApiKeyCreated)
            .api_key(created.id)
            .details(serde_json::json!({
                "key_name": created.name,
                "scopes": created.scopes,
                "auto_generated": auto_generated,
            }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(created)
    }

    /// Replaces the key value with a fresh one and audits the rotation.
    /// The new value is returned once; callers must copy it immediately.
    #[instrument(skip(self))]
    pub async fn regenerate(&self, key_id: Uuid) -> Result<ApiKey, ApiError> {
        let new_key = generate_api_key();
        let sql = format!(
            "UPDATE api_keys SET key = $2 WHERE id = $1 RETURNING {KEY_COLUMNS}"
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<ApiKey> = sqlx::query_as::<_, ApiKey>(&sql)
            .bind(key_id)
            .bind(&new_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::NotFound {
            resource: format!("api_key:{key_id}"),
        })?;

        let audit = AuditEvent::new(AuditEventType::ApiKeyRegenerated)
            .api_key(updated.id)
            .details(serde_json::json!({ "key_name": updated.name }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(updated)
    }

    /// Deletes a key, auditing what it was before removal.
    #[instrument(skip(self))]
    pub async fn delete(&self, key_id: Uuid) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        let sql = format!("DELETE FROM api_keys WHERE id = $1 RETURNING {KEY_COLUMNS}");
        let deleted: Option<ApiKey> = sqlx::query_as::<_, ApiKey>(&sql)
            .bind(key_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let deleted = deleted.ok_or_else(|| ApiError::NotFound {
            resource: format!("api_key:{key_id}"),
        })?;

        let audit = AuditEvent::new(AuditEventType::ApiKeyDeleted).details(serde_json::json!({
            "key_name": deleted.name,
            "was_active": deleted.is_active,
            "usage_count": deleted.usage_count,
            "last_used": deleted.last_used.map(|t| t.to_rfc3339()),
        }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    pub async fn count_active(&self) -> Result<i64, ApiError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM api_keys WHERE is_active = TRUE")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::DatabaseError)?;
        Ok(count.0)
    }
}
