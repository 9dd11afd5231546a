//! # Token Repository
//!
//! PostgreSQL access for setup tokens and email OTPs - the two credential
//! protocols whose writes must be strictly serialized.
//!
//! Both consumption paths lock their row with `SELECT … FOR UPDATE` inside
//! a single transaction, so concurrent retries cannot lose an `attempts`
//! increment or consume a one-shot token twice. Audit events are appended
//! within the same transaction.

use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use shared::validation::ip_in_list;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::entities::{EmailOtp, Host, SetupToken, User};
use crate::domain::events::{AuditEvent, AuditEventType, Severity};
use crate::domain::otp::{evaluate_attempt, OtpFailure};
use crate::repository::audit_repository::append_with;
use crate::repository::user_repository::USER_COLUMNS;

const TOKEN_COLUMNS: &str = "id, user_id, host_id, token_hash, device_name, expires_at, \
     consumed, consumed_date, max_uses, current_uses, allowed_cidrs, \
     config_version, created_at, updated_at";

const OTP_COLUMNS: &str = "id, otp_request_id, otp_hash, browser_token_hash, email, user_id, \
     host_id, client_ip, user_agent, expires_at, attempts, consumed, consumed_at, \
     config_version, created_at, updated_at";

// =============================================================================
// OUTCOME TYPES
// =============================================================================

/// Result of a setup-token consumption attempt, in check order.
#[derive(Debug, Clone)]
pub enum TokenConsumeOutcome {
    /// Token accepted; `current_uses` incremented (and possibly consumed).
    Consumed(SetupToken),
    /// No matching unconsumed, unexpired token for this user.
    InvalidOrExpired,
    /// Token restricted to CIDRs the client IP is not in.
    IpNotAllowed,
    /// `current_uses` already reached `max_uses`.
    UsageLimitExceeded,
}

/// Result of an email-OTP validation attempt.
#[derive(Debug, Clone)]
pub enum OtpAttemptOutcome {
    /// Code and browser binding matched; row marked consumed.
    Valid {
        otp: EmailOtp,
        user: Option<User>,
    },
    Failed(OtpFailure),
}

/// Fields persisted for a new setup token.
#[derive(Debug, Clone)]
pub struct NewSetupToken {
    pub user_id: Uuid,
    pub host_id: Uuid,
    /// `sha512:<hex>` of the plain token
    pub token_hash: String,
    pub device_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: i32,
    pub allowed_cidrs: Option<String>,
}

/// Fields persisted for a new email-OTP request.
#[derive(Debug, Clone)]
pub struct NewEmailOtp {
    pub otp_request_id: String,
    pub otp_hash: String,
    pub browser_token_hash: String,
    pub email: String,
    pub user_id: Uuid,
    pub host_id: Uuid,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// TOKEN REPOSITORY
// =============================================================================

/// Repository for setup tokens and email OTPs.
#[derive(Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // SETUP TOKENS
    // =========================================================================

    /// Persists a new setup token and its generation audit event in one
    /// transaction.
    #[instrument(skip(self, new, audit), fields(user_id = %new.user_id))]
    pub async fn insert_setup_token(
        &self,
        new: NewSetupToken,
        audit: AuditEvent,
    ) -> Result<SetupToken, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO setup_tokens (
                id, user_id, host_id, token_hash, device_name,
                expires_at, max_uses, allowed_cidrs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TOKEN_COLUMNS}
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;
        let created: SetupToken = sqlx::query_as::<_, SetupToken>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(new.host_id)
            .bind(&new.token_hash)
            .bind(&new.device_name)
            .bind(new.expires_at)
            .bind(new.max_uses)
            .bind(&new.allowed_cidrs)
            .fetch_one(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(created)
    }

    /// Whether the user holds a currently valid token for this host
    /// (unconsumed, unexpired, under its use cap).
    pub async fn has_valid_token(&self, user_id: Uuid, host_id: Uuid) -> Result<bool, ApiError> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM setup_tokens
                WHERE user_id = $1 AND host_id = $2
                  AND consumed = FALSE
                  AND expires_at > NOW()
                  AND current_uses < max_uses
            )
            "#,
        )
        .bind(user_id)
        .bind(host_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;
        Ok(row.0)
    }

    /// Consumes one use of a setup token, atomically.
    ///
    /// Checks run in contract order inside a single transaction with the
    /// token row locked: existence/expiry, CIDR restriction, usage cap,
    /// then increment + conditional consume + audit.
    #[instrument(skip(self, user, token_hash), fields(username = %user.username))]
    pub async fn consume_setup_token(
        &self,
        user: &User,
        token_hash: &str,
        client_ip: &str,
    ) -> Result<TokenConsumeOutcome, ApiError> {
        let select_sql = format!(
            r#"
            SELECT {TOKEN_COLUMNS} FROM setup_tokens
            WHERE user_id = $1 AND token_hash = $2
              AND consumed = FALSE AND expires_at > NOW()
            FOR UPDATE
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        let token: Option<SetupToken> = sqlx::query_as::<_, SetupToken>(&select_sql)
            .bind(user.id)
            .bind(token_hash)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let token = match token {
            Some(token) => token,
            None => return Ok(TokenConsumeOutcome::InvalidOrExpired),
        };

        // CIDR restriction: an unparseable client IP never matches
        let allowed = token.allowed_cidr_list();
        if !allowed.is_empty() {
            let permitted = client_ip
                .parse::<std::net::IpAddr>()
                .map(|ip| ip_in_list(ip, &allowed))
                .unwrap_or(false);
            if !permitted {
                return Ok(TokenConsumeOutcome::IpNotAllowed);
            }
        }

        if token.current_uses >= token.max_uses {
            return Ok(TokenConsumeOutcome::UsageLimitExceeded);
        }

        let update_sql = format!(
            r#"
            UPDATE setup_tokens
            SET current_uses = current_uses + 1,
                consumed = (current_uses + 1 >= max_uses),
                consumed_date = NOW()
            WHERE id = $1
            RETURNING {TOKEN_COLUMNS}
            "#
        );
        let updated: SetupToken = sqlx::query_as::<_, SetupToken>(&update_sql)
            .bind(token.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let audit = AuditEvent::new(AuditEventType::SetupTokenConsumed)
            .user(user.id, &user.username)
            .ip(Some(client_ip.to_string()))
            .details(serde_json::json!({
                "token_id": updated.id,
                "device_name": updated.device_name,
                "current_uses": updated.current_uses,
                "max_uses": updated.max_uses,
            }));
        append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        tx.commit().await.map_err(ApiError::DatabaseError)?;

        info!(username = %user.username, "Setup token consumed");
        Ok(TokenConsumeOutcome::Consumed(updated))
    }

    // =========================================================================
    // EMAIL OTPS
    // =========================================================================

    /// Persists a new OTP request row.
    pub async fn insert_email_otp(&self, new: NewEmailOtp) -> Result<EmailOtp, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO email_otps (
                id, otp_request_id, otp_hash, browser_token_hash, email,
                user_id, host_id, client_ip, user_agent, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {OTP_COLUMNS}
            "#
        );
        sqlx::query_as::<_, EmailOtp>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.otp_request_id)
            .bind(&new.otp_hash)
            .bind(&new.browser_token_hash)
            .bind(&new.email)
            .bind(new.user_id)
            .bind(new.host_id)
            .bind(&new.client_ip)
            .bind(&new.user_agent)
            .bind(new.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Records one validation attempt, serialized per OTP row.
    ///
    /// The row is locked for the whole evaluation so concurrent retries
    /// cannot lose `attempts` increments; the per-failure audit event is
    /// appended in the same transaction.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(otp_request_id = %otp_request_id, host = %host.domain))]
    pub async fn record_otp_attempt(
        &self,
        host: &Host,
        otp_request_id: &str,
        email: &str,
        presented_otp_hash: &str,
        presented_browser_token_hash: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
        max_attempts: i32,
    ) -> Result<OtpAttemptOutcome, ApiError> {
        let select_sql = format!(
            r#"
            SELECT {OTP_COLUMNS} FROM email_otps
            WHERE otp_request_id = $1 AND email = $2 AND host_id = $3
            FOR UPDATE
            "#
        );

        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        let otp: Option<EmailOtp> = sqlx::query_as::<_, EmailOtp>(&select_sql)
            .bind(otp_request_id)
            .bind(email)
            .bind(host.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::DatabaseError)?;

        let otp = match otp {
            Some(otp) => otp,
            None => {
                let failure = OtpFailure::OtpNotFound;
                let (event, severity) = failure.audit_event();
                let audit = AuditEvent::new(event)
                    .severity(severity)
                    .ip(client_ip)
                    .user_agent(user_agent)
                    .details(serde_json::json!({
                        "email": email,
                        "host": host.domain,
                        "reason": failure.reason(),
                        "otp_request_id": otp_request_id,
                    }));
                append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
                tx.commit().await.map_err(ApiError::DatabaseError)?;
                return Ok(OtpAttemptOutcome::Failed(failure));
            }
        };

        let user: Option<User> = match otp.user_id {
            Some(user_id) => {
                let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
                sqlx::query_as::<_, User>(&sql)
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(ApiError::DatabaseError)?
            }
            None => None,
        };

        match evaluate_attempt(
            &otp,
            presented_otp_hash,
            presented_browser_token_hash,
            Utc::now(),
            max_attempts,
        ) {
            Err(failure) => {
                let attempts = if failure.increments_attempts() {
                    let row: (i32,) = sqlx::query_as(
                        "UPDATE email_otps SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
                    )
                    .bind(otp.id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(ApiError::DatabaseError)?;
                    row.0
                } else {
                    otp.attempts
                };

                let (event, severity) = failure.audit_event();
                let mut audit = AuditEvent::new(event)
                    .severity(severity)
                    .ip(client_ip)
                    .user_agent(user_agent)
                    .details(serde_json::json!({
                        "email": email,
                        "host": host.domain,
                        "reason": failure.reason(),
                        "otp_request_id": otp_request_id,
                        "attempts": attempts,
                    }));
                if let Some(user) = &user {
                    audit = audit.user(user.id, &user.username);
                }
                append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
                tx.commit().await.map_err(ApiError::DatabaseError)?;
                Ok(OtpAttemptOutcome::Failed(failure))
            }
            Ok(()) => {
                let update_sql = format!(
                    r#"
                    UPDATE email_otps
                    SET consumed = TRUE, consumed_at = NOW()
                    WHERE id = $1
                    RETURNING {OTP_COLUMNS}
                    "#
                );
                let consumed: EmailOtp = sqlx::query_as::<_, EmailOtp>(&update_sql)
                    .bind(otp.id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(ApiError::DatabaseError)?;

                let mut audit = AuditEvent::new(AuditEventType::EmailOtpValidated)
                    .ip(client_ip)
                    .user_agent(user_agent)
                    .details(serde_json::json!({
                        "email": email,
                        "host": host.domain,
                        "otp_request_id": otp_request_id,
                    }));
                if let Some(user) = &user {
                    audit = audit.user(user.id, &user.username);
                }
                append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
                tx.commit().await.map_err(ApiError::DatabaseError)?;

                info!(email = %email, host = %host.domain, "Email OTP validated");
                Ok(OtpAttemptOutcome::Valid { otp: consumed, user })
            }
        }
    }

    /// Deletes OTPs that expired more than 24h ago, or were consumed more
    /// than 24h ago, auditing one summary event when anything was removed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_otps(&self) -> Result<u64, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        let result = sqlx::query(
            r#"
            DELETE FROM email_otps
            WHERE expires_at < NOW() - INTERVAL '24 hours'
               OR (consumed = TRUE AND consumed_at < NOW() - INTERVAL '24 hours')
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        let count = result.rows_affected();
        if count > 0 {
            let audit = AuditEvent::new(AuditEventType::EmailOtpCleanup)
                .severity(Severity::Info)
                .source("system")
                .details(serde_json::json!({
                    "count": count,
                    "reason": "Scheduled cleanup of expired/consumed OTPs",
                }));
            append_with(&mut *tx, &audit).await.map_err(ApiError::DatabaseError)?;
        }

        tx.commit().await.map_err(ApiError::DatabaseError)?;
        Ok(count)
    }
}
