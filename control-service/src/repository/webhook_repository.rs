//! # Webhook Token Repository
//!
//! PostgreSQL access for per-host webhook tokens (multi-provider: each token
//! can name its own header/parameter and source).

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::WebhookToken;
use crate::domain::events::{AuditEvent, AuditEventType};
use crate::domain::token_codec::generate_webhook_token;
use crate::repository::audit_repository::append_with;

const WEBHOOK_COLUMNS: &str = "id, host_id, name, token, token_source, header_name, param_name, \
     is_active, allowed_cidrs, expires_at, last_used, usage_count, \
     config_version, created_at, updated_at";

// =============================================================================
// WEBHOOK REPOSITORY
// =============================================================================

/// Repository for webhook token rows.
#[derive(Clone)]
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<WebhookToken>, ApiError> {
        let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_tokens WHERE token = $1");
        sqlx::query_as::<_, WebhookToken>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    pub async fn find_by_id(&self, token_id: Uuid) -> Result<Option<WebhookToken>, ApiError> {
        let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_tokens WHERE id = $1");
        sqlx::query_as::<_, WebhookToken>(&sql)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Active tokens of one host; final validity (expiry, CIDR) is checked
    /// by the snapshot builder per token.
    pub async fn list_active_for_host(&self, host_id: Uuid) -> Result<Vec<WebhookToken>, ApiError> {
        let sql = format!(
            r#"
            SELECT {WEBHOOK_COLUMNS} FROM webhook_tokens
            WHERE host_id = $1 AND is_active = TRUE
            ORDER BY name
            "#
        );
        sqlx::query_as::<_, WebhookToken>(&sql)
            .bind(host_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Updates usage counters and audits the use, in one transaction.
    #[instrument(skip(self, token), fields(name = %token.name))]
    pub async fn track_usage(
        &self,
        token: &WebhookToken,
        host_domain: &str,
        client_ip: Option<String>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        sqlx::query(
            "UPDATE webhook_tokens SET last_used = NOW(), usage_count = usage_count + 1 WHERE id = $1",
        )
        .bind(token.id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        let audit = AuditEvent::new(AuditEventType::WebhookUsed)
            .ip(client_ip)
            .details(serde_json::json!({
                "token_name": token.name,
                "host": host_domain,
            }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Replaces the token value and audits the rotation. The new value is
    /// in the returned row.
    #[instrument(skip(self))]
    pub async fn regenerate(
        &self,
        token_id: Uuid,
        host_domain: &str,
    ) -> Result<WebhookToken, ApiError> {
        let new_value = generate_webhook_token();
        let sql = format!(
            "UPDATE webhook_tokens SET token = $2 WHERE id = $1 RETURNING {WEBHOOK_COLUMNS}"
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let updated: Option<WebhookToken> = sqlx::query_as::<_, WebhookToken>(&sql)
            .bind(token_id)
            .bind(&new_value)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let updated = updated.ok_or_else(|| ApiError::NotFound {
            resource: format!("webhook_token:{token_id}"),
        })?;

        let audit = AuditEvent::new(AuditEventType::WebhookRegenerated).details(serde_json::json!({
            "token_name": updated.name,
            "host": host_domain,
        }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(updated)
    }
}
