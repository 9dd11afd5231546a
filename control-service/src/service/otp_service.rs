//! # Email OTP Service
//!
//! Request and validation of email one-time passwords with the
//! anti-phishing browser binding.
//!
//! ## Timing-safe request path
//!
//! `request_otp` MUST NOT reveal whether an email maps to an account. Both
//! branches perform the same visible work: generate the request id and the
//! code, hash it, write one audit event, and return the identical response
//! shape. The only divergence - persisting the row and handing the code to
//! the mail transport - happens for existing users, and the mail hand-off
//! is pushed out of the response path onto a background task.

use chrono::{DateTime, Duration, Utc};
use shared::errors::ApiError;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::entities::Host;
use crate::domain::events::{AuditEvent, AuditEventType};
use crate::domain::otp::OtpFailure;
use crate::domain::token_codec::{generate_otp_code, generate_otp_request_id, otp_hash};
use crate::repository::token_repository::{NewEmailOtp, OtpAttemptOutcome};
use crate::repository::{AuditRepository, HostRepository, TokenRepository, UserRepository};
use crate::service::mailer::{MailMessage, MailTransport};

/// Maximum failed attempts before lockout.
pub const OTP_MAX_ATTEMPTS: i32 = 5;

/// Cooldown before a resend is offered.
const RESEND_COOLDOWN_S: i64 = 60;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Wire response of an OTP request. Identical shape whether or not the
/// email resolved to a user.
#[derive(Debug, Clone)]
pub struct OtpRequestResult {
    pub otp_request_id: String,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

/// Wire response of an OTP validation.
#[derive(Debug, Clone)]
pub struct OtpValidationResult {
    pub valid: bool,
    pub username: Option<String>,
    pub session_duration_s: Option<i32>,
    pub error_code: Option<&'static str>,
}

impl OtpValidationResult {
    fn failure(failure: OtpFailure) -> Self {
        Self {
            valid: false,
            username: None,
            session_duration_s: None,
            error_code: Some(failure.error_code()),
        }
    }
}

// =============================================================================
// OTP SERVICE
// =============================================================================

/// Business logic for the email-OTP login path.
#[derive(Clone)]
pub struct OtpService {
    tokens: TokenRepository,
    users: UserRepository,
    hosts: HostRepository,
    audit: AuditRepository,
    mailer: Arc<dyn MailTransport>,
}

impl OtpService {
    pub fn new(
        tokens: TokenRepository,
        users: UserRepository,
        hosts: HostRepository,
        audit: AuditRepository,
        mailer: Arc<dyn MailTransport>,
    ) -> Self {
        Self { tokens, users, hosts, audit, mailer }
    }

    // =========================================================================
    // REQUEST
    // =========================================================================

    /// Creates an OTP request for `email` on `host`.
    ///
    /// `browser_token_hash` is the SHA-256 of the `srbt_` cookie the worker
    /// set in the requesting browser; validation later requires the same
    /// browser.
    #[instrument(skip_all, fields(host = %host_domain))]
    pub async fn request_otp(
        &self,
        email: &str,
        host_domain: &str,
        browser_token_hash: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<OtpRequestResult, ApiError> {
        let host = self
            .hosts
            .find_active_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        if !host.enable_email_login {
            return Err(ApiError::BadRequest {
                message: format!("Email login is not enabled for {host_domain}"),
            });
        }

        let email_normalized = email.trim().to_lowercase();
        let otp_request_id = generate_otp_request_id();
        let otp_code = generate_otp_code();
        let code_hash = otp_hash(&otp_code);

        let validity_seconds = i64::from(host.email_otp_validity_s.max(1));
        let now = Utc::now();
        let expires_at = now + Duration::seconds(validity_seconds);
        let resend_available_at = now + Duration::seconds(RESEND_COOLDOWN_S);

        let user = self
            .users
            .find_active_by_email_for_host(&email_normalized, host.id)
            .await?;

        match user {
            Some(user) => {
                self.tokens
                    .insert_email_otp(NewEmailOtp {
                        otp_request_id: otp_request_id.clone(),
                        otp_hash: code_hash,
                        browser_token_hash: browser_token_hash.to_string(),
                        email: email_normalized.clone(),
                        user_id: user.id,
                        host_id: host.id,
                        client_ip: client_ip.clone(),
                        user_agent: user_agent.clone(),
                        expires_at,
                    })
                    .await?;

                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::EmailOtpRequested)
                            .user(user.id, &user.username)
                            .ip(client_ip)
                            .user_agent(user_agent)
                            .details(serde_json::json!({
                                "email": email_normalized,
                                "host": host.domain,
                                "otp_request_id": otp_request_id,
                                "validity_seconds": validity_seconds,
                            })),
                    )
                    .await?;

                // Delivery is out of band; the response must not wait for
                // (or reveal) the mail hand-off
                self.spawn_otp_email(&host, &user.email, &otp_code, validity_seconds);
            }
            None => {
                // Unknown email: equivalent visible work, no row, no mail
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::EmailOtpRequestedUnknown)
                            .ip(client_ip)
                            .user_agent(user_agent)
                            .details(serde_json::json!({
                                "email": email_normalized,
                                "host": host.domain,
                                "otp_request_id": otp_request_id,
                            })),
                    )
                    .await?;
            }
        }

        Ok(OtpRequestResult { otp_request_id, expires_at, resend_available_at })
    }

    fn spawn_otp_email(&self, host: &Host, to: &str, otp_code: &str, validity_seconds: i64) {
        let mailer = Arc::clone(&self.mailer);
        let message = MailMessage {
            to: to.to_string(),
            subject: format!("Your login code for {}", host.domain),
            template: "email_otp".to_string(),
            variables: serde_json::json!({
                "otp_code": otp_code,
                "host": host.domain,
                "validity_seconds": validity_seconds,
            }),
        };
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&message).await {
                tracing::warn!(error = %e, to = %message.to, "OTP email hand-off failed");
            }
        });
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Validates an OTP code against its request, browser binding first.
    ///
    /// Attempt accounting and the per-failure audit events happen inside
    /// the repository transaction; this method resolves the host, hashes
    /// the inputs, and shapes the wire response.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(host = %host_domain))]
    pub async fn validate_otp(
        &self,
        email: &str,
        otp_code: &str,
        otp_request_id: &str,
        browser_token_hash: &str,
        host_domain: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<OtpValidationResult, ApiError> {
        let host = match self.hosts.find_by_domain(host_domain).await? {
            Some(host) => host,
            None => return Ok(OtpValidationResult::failure(OtpFailure::HostNotFound)),
        };

        let email_normalized = email.trim().to_lowercase();
        let presented_hash = otp_hash(otp_code);

        let outcome = self
            .tokens
            .record_otp_attempt(
                &host,
                otp_request_id,
                &email_normalized,
                &presented_hash,
                browser_token_hash,
                client_ip,
                user_agent,
                OTP_MAX_ATTEMPTS,
            )
            .await?;

        match outcome {
            OtpAttemptOutcome::Valid { user, .. } => {
                info!(email = %email_normalized, host = %host.domain, "Email OTP login");
                Ok(OtpValidationResult {
                    valid: true,
                    username: user.as_ref().map(|u| u.username.clone()),
                    session_duration_s: Some(host.email_login_duration_s()),
                    error_code: None,
                })
            }
            OtpAttemptOutcome::Failed(failure) => Ok(OtpValidationResult::failure(failure)),
        }
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Cron entry point: prunes OTPs expired or consumed more than 24 h ago.
    pub async fn cleanup_expired(&self) -> Result<u64, ApiError> {
        let count = self.tokens.cleanup_expired_otps().await?;
        if count > 0 {
            info!(count = count, "Cleaned up expired/consumed email OTPs");
        }
        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_result_shape() {
        let result = OtpValidationResult::failure(OtpFailure::BrowserTokenMismatch);
        assert!(!result.valid);
        assert_eq!(result.error_code, Some("browser_token_mismatch"));
        assert!(result.username.is_none());
        assert!(result.session_duration_s.is_none());
    }

    #[test]
    fn test_max_attempts_constant_matches_contract() {
        assert_eq!(OTP_MAX_ATTEMPTS, 5);
    }
}
