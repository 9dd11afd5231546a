//! # Settings Repository
//!
//! Admin-tunable process-wide parameters, stored in the `config_params`
//! key/value table so they can be changed without a redeploy. Typed getters
//! fall back to the documented defaults when a key is absent or malformed.

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;

/// Recognized parameter keys and their defaults.
pub mod keys {
    /// Upper bound checked in host session-duration validation.
    pub const MAX_SESSION_DURATION_S: &str = "sunray.max_session_duration_s";
    pub const DEFAULT_MAX_SESSION_DURATION_S: i64 = 86_400;

    /// Upper bound for the WAF-bypass revalidation period.
    pub const MAX_WAF_BYPASS_REVALIDATION_S: &str = "sunray.max_waf_bypass_revalidation_s";
    pub const DEFAULT_MAX_WAF_BYPASS_REVALIDATION_S: i64 = 3_600;

    /// Setup-token wizard defaults.
    pub const DEFAULT_TOKEN_DEVICE_NAME: &str = "sunray.default_token_device_name";
    pub const DEFAULT_TOKEN_DEVICE_NAME_VALUE: &str = "Device";
    pub const DEFAULT_TOKEN_VALID_HOURS: &str = "sunray.default_token_valid_hours";
    pub const DEFAULT_TOKEN_VALID_HOURS_VALUE: i64 = 48;
    pub const DEFAULT_TOKEN_MAXIMUM_USE: &str = "sunray.default_token_maximum_use";
    pub const DEFAULT_TOKEN_MAXIMUM_USE_VALUE: i64 = 1;

    /// Email template selection for setup-token delivery.
    pub const SETUP_TOKEN_MAIL_TEMPLATE: &str = "sunray.setup_token_mail_template";
    pub const SETUP_TOKEN_SEND_EMAIL_DEFAULT: &str = "sunray.setup_token_send_email_default";

    /// Remote-auth parameters embedded into the config snapshot.
    pub const REMOTE_AUTH_POLLING_INTERVAL: &str = "remote_auth.polling_interval";
    pub const DEFAULT_REMOTE_AUTH_POLLING_INTERVAL: i64 = 3;
    pub const REMOTE_AUTH_CHALLENGE_TTL: &str = "remote_auth.challenge_ttl";
    pub const DEFAULT_REMOTE_AUTH_CHALLENGE_TTL: i64 = 120;

    /// Comma-separated IPs/CIDRs permitted to reach the admin surface.
    pub const ADMIN_IP_WHITELIST: &str = "sunray.admin_ip_whitelist";
}

// =============================================================================
// SETTINGS REPOSITORY
// =============================================================================

/// Repository for the `config_params` key/value table.
#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Raw value of a parameter, if set.
    pub async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM config_params WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::DatabaseError)?;
        Ok(row.map(|(value,)| value))
    }

    /// Integer parameter with fallback. Malformed stored values fall back
    /// too (and are logged), rather than poisoning validation paths.
    pub async fn get_i64(&self, key: &str, default: i64) -> Result<i64, ApiError> {
        match self.get(key).await? {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(value) => Ok(value),
                Err(_) => {
                    tracing::warn!(key = key, value = %raw, "Malformed config parameter, using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// String parameter with fallback.
    pub async fn get_or(&self, key: &str, default: &str) -> Result<String, ApiError> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    /// Boolean parameter with fallback; accepts `true/false/1/0`.
    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool, ApiError> {
        match self.get(key).await?.as_deref() {
            Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            _ => Ok(default),
        }
    }

    /// Upserts a parameter.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO config_params (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;
        Ok(())
    }
}
