//! # Host Repository
//!
//! PostgreSQL access for protected hosts, their access rules, and the
//! migration-sensitive write paths.
//!
//! The migration swap and the pending-worker admin operations are
//! implemented as conditional single-statement updates inside one
//! transaction together with their audit event, so concurrent observers
//! never see a half-migrated host (and racing admins lose cleanly with a
//! conflict instead of clobbering each other).

use chrono::Utc;
use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::entities::{AccessRule, Host, Worker};
use crate::domain::events::AuditEvent;
use crate::domain::host_state::{derive_state, HostStateInput};
use crate::repository::audit_repository::append_with;
use crate::repository::user_repository::map_unique_violation;

const HOST_COLUMNS: &str = "id, domain, backend_url, is_active, block_all_traffic, worker_id, \
     session_duration_s, bypass_waf_for_authenticated, waf_bypass_revalidation_s, \
     allowed_cidrs, public_url_patterns, token_url_patterns, \
     webhook_header_name, webhook_param_name, \
     pending_worker_name, migration_requested_at, last_migration_ts, \
     deployment_mode, golive_date, deployment_session_ttl, \
     enable_email_login, email_login_session_duration_s, email_otp_validity_s, \
     remote_auth_enabled, remote_auth_session_ttl, remote_auth_max_session_ttl, \
     session_mgmt_enabled, session_mgmt_ttl, \
     state, config_version, created_at, updated_at";

const RULE_COLUMNS: &str = "id, host_id, rule_type, rule_value, description, is_active, priority, \
     config_version, created_at, updated_at";

// =============================================================================
// HOST REPOSITORY
// =============================================================================

/// Repository for protected-host rows and their owned access rules.
#[derive(Clone)]
pub struct HostRepository {
    pool: PgPool,
}

impl HostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    pub async fn find_by_id(&self, host_id: Uuid) -> Result<Option<Host>, ApiError> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = $1");
        sqlx::query_as::<_, Host>(&sql)
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn find_by_domain(&self, domain: &str) -> Result<Option<Host>, ApiError> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE domain = $1");
        sqlx::query_as::<_, Host>(&sql)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    pub async fn find_active_by_domain(&self, domain: &str) -> Result<Option<Host>, ApiError> {
        let sql =
            format!("SELECT {HOST_COLUMNS} FROM hosts WHERE domain = $1 AND is_active = TRUE");
        sqlx::query_as::<_, Host>(&sql)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// All active hosts, ordered by domain. Feeds the config snapshot.
    pub async fn list_active(&self) -> Result<Vec<Host>, ApiError> {
        let sql =
            format!("SELECT {HOST_COLUMNS} FROM hosts WHERE is_active = TRUE ORDER BY domain");
        sqlx::query_as::<_, Host>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Hosts currently bound to the given worker.
    pub async fn hosts_for_worker(&self, worker_id: Uuid) -> Result<Vec<Host>, ApiError> {
        let sql =
            format!("SELECT {HOST_COLUMNS} FROM hosts WHERE worker_id = $1 ORDER BY domain");
        sqlx::query_as::<_, Host>(&sql)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Usernames authorized on this host, for the config snapshot.
    pub async fn authorized_usernames(&self, host_id: Uuid) -> Result<Vec<String>, ApiError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT u.username FROM users u
            JOIN user_hosts uh ON uh.user_id = u.id
            WHERE uh.host_id = $1 AND u.is_active = TRUE
            ORDER BY u.username
            "#,
        )
        .bind(host_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Active access rules for the worker's exception tree, priority order.
    pub async fn access_rules(&self, host_id: Uuid) -> Result<Vec<AccessRule>, ApiError> {
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS} FROM access_rules
            WHERE host_id = $1 AND is_active = TRUE
            ORDER BY priority, created_at
            "#
        );
        sqlx::query_as::<_, AccessRule>(&sql)
            .bind(host_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    pub async fn count_active(&self) -> Result<i64, ApiError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hosts WHERE is_active = TRUE")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;
        Ok(count.0)
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Creates a host with default policy; duplicate domain surfaces as 409.
    /// Everything else (timings, deployment mode, login flags) keeps its
    /// database default until an admin changes it.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn create(&self, domain: &str, backend_url: &str) -> Result<Host, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO hosts (id, domain, backend_url)
            VALUES ($1, $2, $3)
            RETURNING {HOST_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Host>(&sql)
            .bind(Uuid::new_v4())
            .bind(domain)
            .bind(backend_url)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation("domain already registered"))
    }

    // =========================================================================
    // WORKER BINDING & MIGRATION
    // =========================================================================

    /// Binds an unbound host to a worker (initial registration), appending
    /// `audit` in the same transaction. Fails with 409 when another worker
    /// grabbed the host concurrently.
    #[instrument(skip(self, audit), fields(domain = %host.domain, worker = %worker.name))]
    pub async fn bind_worker(
        &self,
        host: &Host,
        worker: &Worker,
        audit: AuditEvent,
    ) -> Result<Host, ApiError> {
        let new_state = self.state_with_worker(host);
        let sql = format!(
            r#"
            UPDATE hosts
            SET worker_id = $2, state = $3
            WHERE id = $1 AND worker_id IS NULL
            RETURNING {HOST_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<Host> = sqlx::query_as::<_, Host>(&sql)
            .bind(host.id)
            .bind(worker.id)
            .bind(new_state)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::Conflict {
            resource: format!("Host {} is already bound to a worker", host.domain),
        })?;

        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        info!(domain = %updated.domain, worker = %worker.name, "Host bound to worker");
        Ok(updated)
    }

    /// Performs the migration swap in one commit: rebind, clear the pending
    /// fields, stamp `last_migration_ts`, recompute state, audit.
    ///
    /// The `pending_worker_name` guard makes the swap race-free against a
    /// concurrent `clear_pending_worker`.
    #[instrument(skip(self, audit), fields(domain = %host.domain, worker = %worker.name))]
    pub async fn migrate_to_worker(
        &self,
        host: &Host,
        worker: &Worker,
        audit: AuditEvent,
    ) -> Result<Host, ApiError> {
        let new_state = self.state_with_worker(host);
        let sql = format!(
            r#"
            UPDATE hosts
            SET worker_id = $2,
                pending_worker_name = NULL,
                migration_requested_at = NULL,
                last_migration_ts = NOW(),
                state = $4
            WHERE id = $1 AND pending_worker_name = $3
            RETURNING {HOST_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<Host> = sqlx::query_as::<_, Host>(&sql)
            .bind(host.id)
            .bind(worker.id)
            .bind(&worker.name)
            .bind(new_state)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::Conflict {
            resource: format!("Migration for host {} was cancelled concurrently", host.domain),
        })?;

        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        info!(domain = %updated.domain, worker = %worker.name, "Host migrated to worker");
        Ok(updated)
    }

    /// Schedules a migration. Guarded by `pending_worker_name IS NULL`, so
    /// a second admin gets a 409 instead of silently replacing the target.
    #[instrument(skip(self, audit))]
    pub async fn set_pending_worker(
        &self,
        host_id: Uuid,
        worker_name: &str,
        audit: AuditEvent,
    ) -> Result<Host, ApiError> {
        let sql = format!(
            r#"
            UPDATE hosts
            SET pending_worker_name = $2, migration_requested_at = NOW()
            WHERE id = $1 AND pending_worker_name IS NULL
            RETURNING {HOST_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<Host> = sqlx::query_as::<_, Host>(&sql)
            .bind(host_id)
            .bind(worker_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::Conflict {
            resource: "Migration already pending; clear it before scheduling another".to_string(),
        })?;

        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;
        Ok(updated)
    }

    /// Cancels a pending migration; 409 when none is pending.
    #[instrument(skip(self, audit))]
    pub async fn clear_pending_worker(
        &self,
        host_id: Uuid,
        audit: AuditEvent,
    ) -> Result<Host, ApiError> {
        let sql = format!(
            r#"
            UPDATE hosts
            SET pending_worker_name = NULL, migration_requested_at = NULL
            WHERE id = $1 AND pending_worker_name IS NOT NULL
            RETURNING {HOST_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<Host> = sqlx::query_as::<_, Host>(&sql)
            .bind(host_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::Conflict {
            resource: "No pending migration to clear".to_string(),
        })?;

        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;
        Ok(updated)
    }

    // =========================================================================
    // STATE & TIMING
    // =========================================================================

    /// Persists a recomputed state string.
    pub async fn update_state(&self, host_id: Uuid, state: &str) -> Result<Option<Host>, ApiError> {
        let sql = format!(
            "UPDATE hosts SET state = $2 WHERE id = $1 RETURNING {HOST_COLUMNS}"
        );
        sqlx::query_as::<_, Host>(&sql)
            .bind(host_id)
            .bind(state)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Deployment hosts whose go-live date has arrived. Scanned by the
    /// daily cron.
    pub async fn deployment_hosts_due(
        &self,
        today: chrono::NaiveDate,
    ) -> Result<Vec<Host>, ApiError> {
        let sql = format!(
            r#"
            SELECT {HOST_COLUMNS} FROM hosts
            WHERE state = 'deployment'
              AND golive_date IS NOT NULL
              AND golive_date <= $1
            ORDER BY domain
            "#
        );
        sqlx::query_as::<_, Host>(&sql)
            .bind(today)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Updates a timing override together with its audit event.
    /// `column` is one of the two whitelisted timing columns.
    #[instrument(skip(self, audit))]
    pub async fn update_timing(
        &self,
        host_id: Uuid,
        column: TimingColumn,
        value: i32,
        audit: AuditEvent,
    ) -> Result<Host, ApiError> {
        let sql = format!(
            "UPDATE hosts SET {} = $2 WHERE id = $1 RETURNING {HOST_COLUMNS}",
            column.as_sql()
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<Host> = sqlx::query_as::<_, Host>(&sql)
            .bind(host_id)
            .bind(value)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::NotFound {
            resource: format!("host:{host_id}"),
        })?;

        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;
        Ok(updated)
    }

    /// State the host will have once bound to a worker, as of today.
    fn state_with_worker(&self, host: &Host) -> &'static str {
        derive_state(
            HostStateInput {
                has_worker: true,
                ..host.state_input()
            },
            Utc::now().date_naive(),
        )
        .as_str()
    }
}

/// Whitelisted timing columns for [`HostRepository::update_timing`].
///
/// An enum rather than a string so no caller can smuggle arbitrary SQL into
/// the column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingColumn {
    SessionDuration,
    WafBypassRevalidation,
}

impl TimingColumn {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::SessionDuration => "session_duration_s",
            Self::WafBypassRevalidation => "waf_bypass_revalidation_s",
        }
    }
}
