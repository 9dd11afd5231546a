//! # Setup Token Service
//!
//! The centralized entry point for setup-token issuance, validation and
//! email delivery, plus the user-validation endpoint workers call to decide
//! which login UI to show.
//!
//! Issuance returns the plain token exactly once; only the `sha512:` hash
//! is stored. Validation trusts the worker to hash the claimed token and
//! runs the documented check order against the stored hash.

use chrono::{Duration, Utc};
use shared::errors::ApiError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::entities::{Host, SetupToken, User};
use crate::domain::events::{AuditEvent, AuditEventType, Severity};
use crate::domain::token_codec::{generate_setup_token, sha512_hex};
use crate::repository::settings_repository::keys;
use crate::repository::token_repository::{NewSetupToken, TokenConsumeOutcome};
use crate::repository::{
    AuditRepository, HostRepository, PasskeyRepository, SettingsRepository, TokenRepository,
    UserRepository,
};
use crate::service::mailer::{MailMessage, MailTransport};

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Issuance result: the stored row plus the plain value (shown once).
#[derive(Debug)]
pub struct IssuedToken {
    pub token: SetupToken,
    /// Never retrievable again; hand to the admin or the mail transport now
    pub plain_token: String,
    /// Present when email delivery was requested
    pub email: Option<EmailDelivery>,
}

/// Outcome of handing the token to the mail transport.
#[derive(Debug, Clone)]
pub struct EmailDelivery {
    pub success: bool,
    pub error: Option<String>,
}

/// Wire result of `setup-tokens/validate`.
#[derive(Debug)]
pub struct TokenValidation {
    pub valid: bool,
    pub error: Option<&'static str>,
    pub user: Option<User>,
}

impl TokenValidation {
    fn failure(error: &'static str) -> Self {
        Self { valid: false, error: Some(error), user: None }
    }
}

/// Wire result of `users/validate`: the four booleans the worker uses to
/// pick a login UI. Unknown users get the all-false shape, structurally
/// identical to a known user's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserValidation {
    pub user_exists: bool,
    pub has_passkey: bool,
    pub has_valid_token: bool,
    pub remote_login_allowed: bool,
}

impl UserValidation {
    pub const UNKNOWN: Self = Self {
        user_exists: false,
        has_passkey: false,
        has_valid_token: false,
        remote_login_allowed: false,
    };
}

/// Parameters for token issuance; `None` fields fall back to the wizard
/// defaults in `config_params`.
#[derive(Debug, Clone, Default)]
pub struct IssueTokenParams {
    pub device_name: Option<String>,
    pub validity_hours: Option<i64>,
    pub max_uses: Option<i32>,
    pub allowed_cidrs: Option<String>,
    pub send_email: Option<bool>,
}

// =============================================================================
// TOKEN SERVICE
// =============================================================================

/// Business logic for setup tokens and user validation.
#[derive(Clone)]
pub struct TokenService {
    tokens: TokenRepository,
    users: UserRepository,
    hosts: HostRepository,
    passkeys: PasskeyRepository,
    settings: SettingsRepository,
    audit: AuditRepository,
    mailer: Arc<dyn MailTransport>,
}

impl TokenService {
    pub fn new(
        tokens: TokenRepository,
        users: UserRepository,
        hosts: HostRepository,
        passkeys: PasskeyRepository,
        settings: SettingsRepository,
        audit: AuditRepository,
        mailer: Arc<dyn MailTransport>,
    ) -> Self {
        Self { tokens, users, hosts, passkeys, settings, audit, mailer }
    }

    // =========================================================================
    // ISSUANCE
    // =========================================================================

    /// Creates a setup token for `(user, host)` and returns the plain value
    /// exactly once. Audits `auth.setup_token_generated`; optionally hands
    /// the token to the mail transport.
    #[instrument(skip(self, params), fields(username = %username, host = %host_domain))]
    pub async fn issue_token(
        &self,
        username: &str,
        host_domain: &str,
        params: IssueTokenParams,
    ) -> Result<IssuedToken, ApiError> {
        let user = self
            .users
            .find_active_by_username(username)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{username}") })?;
        let host = self
            .hosts
            .find_active_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        // Wizard defaults from admin-tunable parameters
        let device_name = match params.device_name {
            Some(name) => name,
            None => {
                self.settings
                    .get_or(keys::DEFAULT_TOKEN_DEVICE_NAME, keys::DEFAULT_TOKEN_DEVICE_NAME_VALUE)
                    .await?
            }
        };
        let validity_hours = match params.validity_hours {
            Some(hours) => hours,
            None => {
                self.settings
                    .get_i64(keys::DEFAULT_TOKEN_VALID_HOURS, keys::DEFAULT_TOKEN_VALID_HOURS_VALUE)
                    .await?
            }
        };
        let max_uses = match params.max_uses {
            Some(uses) => i64::from(uses),
            None => {
                self.settings
                    .get_i64(keys::DEFAULT_TOKEN_MAXIMUM_USE, keys::DEFAULT_TOKEN_MAXIMUM_USE_VALUE)
                    .await?
            }
        };

        if validity_hours <= 0 {
            return Err(ApiError::BadRequest {
                message: "Token validity must be positive".to_string(),
            });
        }
        if max_uses <= 0 {
            return Err(ApiError::BadRequest {
                message: "Token maximum uses must be positive".to_string(),
            });
        }

        let plain_token = generate_setup_token();
        let token_hash = sha512_hex(&plain_token);
        let expires_at = Utc::now() + Duration::hours(validity_hours);

        let audit = AuditEvent::new(AuditEventType::SetupTokenGenerated)
            .user(user.id, &user.username)
            .details(serde_json::json!({
                "host": host.domain,
                "device_name": device_name,
                "validity_hours": validity_hours,
                "max_uses": max_uses,
            }));

        let token = self
            .tokens
            .insert_setup_token(
                NewSetupToken {
                    user_id: user.id,
                    host_id: host.id,
                    token_hash,
                    device_name: Some(device_name),
                    expires_at,
                    max_uses: max_uses as i32,
                    allowed_cidrs: params.allowed_cidrs,
                },
                audit,
            )
            .await?;

        let send_email = match params.send_email {
            Some(send) => send,
            None => {
                self.settings
                    .get_bool(keys::SETUP_TOKEN_SEND_EMAIL_DEFAULT, false)
                    .await?
            }
        };

        let email = if send_email {
            Some(self.send_token_email(&token, &user, &host, &plain_token).await?)
        } else {
            None
        };

        info!(username = %user.username, host = %host.domain, "Setup token generated");
        Ok(IssuedToken { token, plain_token, email })
    }

    /// Hands the plain token to the mail transport.
    ///
    /// Every exit writes its own audit event; failures are reported to the
    /// caller but never undo the already-created token.
    pub async fn send_token_email(
        &self,
        token: &SetupToken,
        user: &User,
        host: &Host,
        plain_token: &str,
    ) -> Result<EmailDelivery, ApiError> {
        let template = self
            .settings
            .get(keys::SETUP_TOKEN_MAIL_TEMPLATE)
            .await?
            .filter(|t| !t.trim().is_empty());

        let template = match template {
            Some(template) => template,
            None => {
                let error = "No email template configured. Please configure a default template in Settings.";
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::TokenEmailNoTemplate)
                            .severity(Severity::Error)
                            .user(user.id, &user.username)
                            .details(serde_json::json!({
                                "host": host.domain,
                                "device_name": token.device_name,
                                "error": error,
                            })),
                    )
                    .await?;
                return Ok(EmailDelivery { success: false, error: Some(error.to_string()) });
            }
        };

        if user.email.trim().is_empty() {
            let error = format!("User {} has no email address configured.", user.username);
            self.audit
                .append(
                    AuditEvent::new(AuditEventType::TokenEmailNoRecipient)
                        .severity(Severity::Warning)
                        .user(user.id, &user.username)
                        .details(serde_json::json!({
                            "host": host.domain,
                            "device_name": token.device_name,
                            "error": error,
                        })),
                )
                .await?;
            return Ok(EmailDelivery { success: false, error: Some(error) });
        }

        let message = MailMessage {
            to: user.email.clone(),
            subject: format!("Your setup token for {}", host.domain),
            template: template.clone(),
            variables: serde_json::json!({
                "token_value": plain_token,
                "username": user.username,
                "host": host.domain,
                "device_name": token.device_name,
                "expires_at": token.expires_at.to_rfc3339(),
                "max_uses": token.max_uses,
            }),
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::TokenEmailSent)
                            .user(user.id, &user.username)
                            .details(serde_json::json!({
                                "email": user.email,
                                "host": host.domain,
                                "device_name": token.device_name,
                                "template": template,
                            })),
                    )
                    .await?;
                Ok(EmailDelivery { success: true, error: None })
            }
            Err(e) => {
                warn!(error = %e, username = %user.username, "Setup token email failed");
                let error = format!("Failed to send email: {e}");
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::TokenEmailError)
                            .severity(Severity::Error)
                            .user(user.id, &user.username)
                            .details(serde_json::json!({
                                "email": user.email,
                                "host": host.domain,
                                "device_name": token.device_name,
                                "error": e.to_string(),
                            })),
                    )
                    .await?;
                Ok(EmailDelivery { success: false, error: Some(error) })
            }
        }
    }

    // =========================================================================
    // VALIDATION (worker → control plane)
    // =========================================================================

    /// Validates and consumes one use of a setup token.
    ///
    /// `token_hash` is the SHA-512 hex the worker computed from the claimed
    /// token. Check order and messages are contractual.
    #[instrument(skip(self, token_hash), fields(username = %username))]
    pub async fn validate_token(
        &self,
        username: &str,
        token_hash: &str,
        client_ip: &str,
    ) -> Result<TokenValidation, ApiError> {
        let user = match self.users.find_active_by_username(username).await? {
            Some(user) => user,
            None => return Ok(TokenValidation::failure("User not found")),
        };

        match self.tokens.consume_setup_token(&user, token_hash, client_ip).await? {
            TokenConsumeOutcome::Consumed(_) => Ok(TokenValidation {
                valid: true,
                error: None,
                user: Some(user),
            }),
            TokenConsumeOutcome::InvalidOrExpired => {
                Ok(TokenValidation::failure("Invalid or expired token"))
            }
            TokenConsumeOutcome::IpNotAllowed => Ok(TokenValidation::failure("IP not allowed")),
            TokenConsumeOutcome::UsageLimitExceeded => {
                Ok(TokenValidation::failure("Token usage limit exceeded"))
            }
        }
    }

    // =========================================================================
    // USER VALIDATION (login UI discovery)
    // =========================================================================

    /// Resolves the four login-UI booleans for `(username, host)`.
    ///
    /// Timing-safe enumeration defense: the unknown-user response has the
    /// same JSON shape, and both branches end with one audit write.
    #[instrument(skip(self), fields(username = %username, host = %host_domain))]
    pub async fn validate_user(
        &self,
        username: &str,
        host_domain: &str,
        client_ip: Option<String>,
    ) -> Result<UserValidation, ApiError> {
        let host = self
            .hosts
            .find_active_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        let user = self
            .users
            .find_active_by_username_for_host(username, host.id)
            .await?;

        let user = match user {
            Some(user) => user,
            None => {
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::UserValidationUnknownUser)
                            .ip(client_ip)
                            .details(serde_json::json!({
                                "username": username,
                                "host": host_domain,
                            })),
                    )
                    .await?;
                return Ok(UserValidation::UNKNOWN);
            }
        };

        let has_passkey = self.passkeys.has_passkey_for_host(user.id, host_domain).await?;
        let has_valid_token = self.tokens.has_valid_token(user.id, host.id).await?;
        // Deployment state doubles as the remote-login switch: during the
        // enrollment window users may enter without a verified credential
        let remote_login_allowed = host.state == "deployment";

        self.audit
            .append(
                AuditEvent::new(AuditEventType::UserValidationSuccess)
                    .user(user.id, &user.username)
                    .ip(client_ip)
                    .details(serde_json::json!({
                        "username": username,
                        "host": host_domain,
                        "has_passkey": has_passkey,
                        "has_valid_token": has_valid_token,
                        "remote_login_allowed": remote_login_allowed,
                    })),
            )
            .await?;

        Ok(UserValidation {
            user_exists: true,
            has_passkey,
            has_valid_token,
            remote_login_allowed,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_shape_is_all_false() {
        assert_eq!(
            UserValidation::UNKNOWN,
            UserValidation {
                user_exists: false,
                has_passkey: false,
                has_valid_token: false,
                remote_login_allowed: false,
            }
        );
    }

    #[test]
    fn test_validation_failure_messages() {
        let v = TokenValidation::failure("Invalid or expired token");
        assert!(!v.valid);
        assert_eq!(v.error, Some("Invalid or expired token"));
        assert!(v.user.is_none());
    }
}
