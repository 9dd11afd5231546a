//! # Passkey Repository
//!
//! PostgreSQL access for WebAuthn credentials. The control plane never
//! verifies signatures; it stores what workers report and serves it back in
//! config snapshots.

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::Passkey;
use crate::domain::events::{AuditEvent, AuditEventType};
use crate::repository::audit_repository::append_with;
use crate::repository::user_repository::map_unique_violation;

const PASSKEY_COLUMNS: &str = "id, user_id, credential_id, public_key, name, host_domain, \
     backup_eligible, backup_state, last_used, created_ip, created_user_agent, \
     config_version, created_at, updated_at";

/// Fields reported by a worker when it registers a new passkey.
#[derive(Debug, Clone)]
pub struct NewPasskey {
    pub user_id: Uuid,
    pub credential_id: String,
    pub public_key: String,
    pub name: String,
    /// rpId binding; always set for new registrations
    pub host_domain: String,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub created_ip: Option<String>,
    pub created_user_agent: Option<String>,
}

// =============================================================================
// PASSKEY REPOSITORY
// =============================================================================

/// Repository for passkey rows.
#[derive(Clone)]
pub struct PasskeyRepository {
    pool: PgPool,
}

impl PasskeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_credential_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<Passkey>, ApiError> {
        let sql = format!("SELECT {PASSKEY_COLUMNS} FROM passkeys WHERE credential_id = $1");
        sqlx::query_as::<_, Passkey>(&sql)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// All passkeys of one user, newest first. Feeds the config snapshot.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Passkey>, ApiError> {
        let sql = format!(
            "SELECT {PASSKEY_COLUMNS} FROM passkeys WHERE user_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, Passkey>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Whether the user has a credential bound to this exact rpId. Unbound
    /// legacy credentials do not count; they need re-registration.
    pub async fn has_passkey_for_host(
        &self,
        user_id: Uuid,
        host_domain: &str,
    ) -> Result<bool, ApiError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM passkeys WHERE user_id = $1 AND host_domain = $2)",
        )
        .bind(user_id)
        .bind(host_domain)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;
        Ok(row.0)
    }

    /// Stores a worker-reported credential and audits the registration in
    /// the same transaction. Duplicate credential ids surface as 409.
    #[instrument(skip(self, new), fields(user_id = %new.user_id, name = %new.name))]
    pub async fn create(&self, new: NewPasskey, username: &str) -> Result<Passkey, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO passkeys (
                id, user_id, credential_id, public_key, name, host_domain,
                backup_eligible, backup_state, created_ip, created_user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PASSKEY_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let created: Passkey = sqlx::query_as::<_, Passkey>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(&new.credential_id)
            .bind(&new.public_key)
            .bind(&new.name)
            .bind(&new.host_domain)
            .bind(new.backup_eligible)
            .bind(new.backup_state)
            .bind(&new.created_ip)
            .bind(&new.created_user_agent)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique_violation("credential already registered"))?;

        let audit = AuditEvent::new(AuditEventType::PasskeyRegistered)
            .user(new.user_id, username)
            .ip(new.created_ip.clone())
            .user_agent(new.created_user_agent.clone())
            .details(serde_json::json!({
                "passkey_name": created.name,
                "credential_id": created.credential_id,
                "host_domain": created.host_domain,
            }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(created)
    }

    /// Deletes a credential and audits the revocation in one transaction.
    #[instrument(skip(self))]
    pub async fn revoke(&self, credential_id: &str, username: &str) -> Result<(), ApiError> {
        let sql = format!(
            "DELETE FROM passkeys WHERE credential_id = $1 RETURNING {PASSKEY_COLUMNS}"
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let deleted: Option<Passkey> = sqlx::query_as::<_, Passkey>(&sql)
            .bind(credential_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let deleted = deleted.ok_or_else(|| ApiError::NotFound {
            resource: format!("passkey:{credential_id}"),
        })?;

        let audit = AuditEvent::new(AuditEventType::PasskeyRevoked)
            .user(deleted.user_id, username)
            .details(serde_json::json!({
                "passkey_name": deleted.name,
                "credential_id": deleted.credential_id,
            }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Stamps `last_used` after a worker-reported successful authentication.
    pub async fn touch_last_used(&self, credential_id: &str) -> Result<(), ApiError> {
        sqlx::query("UPDATE passkeys SET last_used = NOW() WHERE credential_id = $1")
            .bind(credential_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;
        Ok(())
    }
}
