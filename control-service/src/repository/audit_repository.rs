//! # Audit Log Repository
//!
//! Append-only sink for the audit event stream. The append API takes the
//! typed [`AuditEvent`] builder, so only declared event types can reach the
//! table; the taxonomy lives in [`crate::domain::events`].
//!
//! Rows are immutable. The single deletion path is
//! [`AuditRepository::prune_older_than`], invoked by the daily retention
//! cron (90 days), which records its own summary event.

use shared::errors::ApiError;
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::events::AuditEvent;

// =============================================================================
// AUDIT REPOSITORY
// =============================================================================

/// Repository for the append-only audit log.
#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends one event using the shared pool.
    ///
    /// For flows that must audit atomically with their data mutation, use
    /// [`append_with`] inside the open transaction instead.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn append(&self, event: AuditEvent) -> Result<(), ApiError> {
        append_with(&self.pool, &event).await.map_err(|e| {
            tracing::error!(error = %e, event_type = %event.event_type, "Failed to append audit event");
            ApiError::DatabaseError(e)
        })
    }

    /// Deletes entries older than `days` days and returns the count.
    ///
    /// Retention only; no other code path deletes audit rows.
    #[instrument(skip(self))]
    pub async fn prune_older_than(&self, days: i64) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_log
            WHERE timestamp < NOW() - ($1::int * INTERVAL '1 day')
            "#,
        )
        .bind(days)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    /// Number of entries currently retained. Used by the health endpoint.
    pub async fn count(&self) -> Result<i64, ApiError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;
        Ok(count.0)
    }

    /// Most recent entries, optionally filtered by event type. Read-only
    /// admin view; `limit` is clamped to 1000.
    pub async fn recent(
        &self,
        limit: i64,
        event_type: Option<&str>,
    ) -> Result<Vec<crate::domain::entities::AuditLogEntry>, ApiError> {
        let limit = limit.clamp(1, 1000);
        let sql = r#"
            SELECT id, timestamp, event_type, severity,
                   sunray_user_id, username, admin_user_id, api_key_id,
                   sunray_worker, ip_address, user_agent, request_id,
                   event_source, details
            FROM audit_log
            WHERE ($2::text IS NULL OR event_type = $2)
            ORDER BY timestamp DESC
            LIMIT $1
        "#;
        sqlx::query_as::<_, crate::domain::entities::AuditLogEntry>(sql)
            .bind(limit)
            .bind(event_type)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }
}

/// Inserts an event through any executor (pool or open transaction).
///
/// Separate from the struct so transactional repository methods can audit
/// within their own transaction without a second `AuditRepository`.
pub async fn append_with<'e, E>(executor: E, event: &AuditEvent) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let details = if event.details.is_null() {
        None
    } else {
        Some(event.details.to_string())
    };

    sqlx::query(
        r#"
        INSERT INTO audit_log (
            id, timestamp, event_type, severity,
            sunray_user_id, username, admin_user_id, api_key_id,
            sunray_worker, ip_address, user_agent, request_id,
            event_source, details
        )
        VALUES ($1, NOW(), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event.event_type.as_str())
    .bind(event.severity.as_str())
    .bind(event.sunray_user_id)
    .bind(&event.username)
    .bind(event.admin_user_id)
    .bind(event.api_key_id)
    .bind(&event.sunray_worker)
    .bind(&event.ip_address)
    .bind(&event.user_agent)
    .bind(&event.request_id)
    .bind(&event.event_source)
    .bind(details)
    .execute(executor)
    .await?;

    Ok(())
}
