//! # Session Repository
//!
//! PostgreSQL access for edge sessions. Revocation is always local-first:
//! the UPDATE here commits before any cache-clear fan-out is attempted, and
//! nothing in the fan-out path can roll it back.
//!
//! Bulk revocation statements return the affected rows so the service layer
//! can audit usernames and counts without a second query.

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::Session;
use crate::repository::user_repository::map_unique_violation;

const SESSION_COLUMNS: &str = "id, session_id, user_id, host_id, session_type, credential_id, \
     is_active, revoked, revoked_reason, expires_at, last_activity, \
     created_ip, device_fingerprint, user_agent, csrf_token, created_via, \
     config_version, created_at, updated_at";

/// Fields recorded when a worker reports a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub host_id: Option<Uuid>,
    /// `normal` or `remote`
    pub session_type: String,
    pub credential_id: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub created_ip: Option<String>,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub csrf_token: Option<String>,
    /// Device-info JSON for remote sessions
    pub created_via: Option<String>,
}

// =============================================================================
// SESSION REPOSITORY
// =============================================================================

/// Repository for session rows.
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, new), fields(session_id = %new.session_id))]
    pub async fn create(&self, new: NewSession) -> Result<Session, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO sessions (
                id, session_id, user_id, host_id, session_type, credential_id,
                expires_at, created_ip, device_fingerprint, user_agent,
                csrf_token, created_via, last_activity
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            RETURNING {SESSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.session_id)
            .bind(new.user_id)
            .bind(new.host_id)
            .bind(&new.session_type)
            .bind(&new.credential_id)
            .bind(new.expires_at)
            .bind(&new.created_ip)
            .bind(&new.device_fingerprint)
            .bind(&new.user_agent)
            .bind(&new.csrf_token)
            .bind(&new.created_via)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation("session_id already recorded"))
    }

    pub async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Session>, ApiError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1");
        sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Unexpired sessions of one user, newest first. Used by the
    /// session-management listing.
    pub async fn list_unexpired_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, ApiError> {
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND expires_at > NOW()
            ORDER BY created_at DESC
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    // =========================================================================
    // REVOCATION (local-first)
    // =========================================================================

    /// Revokes one session. Returns `None` when the session id is unknown,
    /// `Some(session)` with the post-revocation row otherwise (idempotent on
    /// already-revoked sessions).
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn revoke_by_session_id(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<Option<Session>, ApiError> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked = TRUE, revoked_reason = $2
            WHERE session_id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Revokes every active session of a user on one host.
    pub async fn revoke_for_user_on_host(
        &self,
        user_id: Uuid,
        host_id: Uuid,
        reason: &str,
    ) -> Result<Vec<Session>, ApiError> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked = TRUE, revoked_reason = $3
            WHERE user_id = $1 AND host_id = $2 AND is_active = TRUE
            RETURNING {SESSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .bind(host_id)
            .bind(reason)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Revokes every active session of a user across all hosts of a worker.
    pub async fn revoke_for_user_on_worker(
        &self,
        user_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<Vec<Session>, ApiError> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked = TRUE, revoked_reason = $3
            WHERE user_id = $1
              AND is_active = TRUE
              AND host_id IN (SELECT id FROM hosts WHERE worker_id = $2)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .bind(worker_id)
            .bind(reason)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Revokes every active session on one host (all users).
    pub async fn revoke_all_on_host(
        &self,
        host_id: Uuid,
        reason: &str,
    ) -> Result<Vec<Session>, ApiError> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked = TRUE, revoked_reason = $2
            WHERE host_id = $1 AND is_active = TRUE
            RETURNING {SESSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(host_id)
            .bind(reason)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Nuclear: revokes every active session across all hosts of a worker.
    pub async fn revoke_all_on_worker(
        &self,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<Vec<Session>, ApiError> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET is_active = FALSE, revoked = TRUE, revoked_reason = $2
            WHERE is_active = TRUE
              AND host_id IN (SELECT id FROM hosts WHERE worker_id = $1)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(worker_id)
            .bind(reason)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Deactivates sessions whose expiry has passed without marking them
    /// revoked (expiry is not a revocation). Returns the number of rows
    /// swept; called by the hourly cron.
    pub async fn expire_stale(&self) -> Result<u64, ApiError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE WHERE is_active = TRUE AND expires_at <= NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;
        Ok(result.rows_affected())
    }

    /// Removes a session row entirely (user-initiated termination through
    /// the session-management UI).
    pub async fn delete_by_session_id(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;
        Ok(result.rows_affected() > 0)
    }

    /// Active, unexpired sessions. Used by the health endpoint.
    pub async fn count_active(&self) -> Result<i64, ApiError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sessions WHERE is_active = TRUE AND expires_at > NOW()",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;
        Ok(count.0)
    }
}
