//! # Data Transfer Objects
//!
//! Request and response bodies of the control-plane REST surface. Requests
//! derive `Validate`; handlers call `shared::validation::validate_request`
//! before touching any state, so validation always fails before mutation.
//!
//! Response shapes are contractual where the worker consumes them (token
//! validation, OTP request/validation, user validation); see the handler
//! docs for the exact wire examples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::validation::validators;
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// GENERIC RESPONSES
// =============================================================================

/// Simple acknowledgment body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }
}

// =============================================================================
// USERS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CheckUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(custom(function = "validators::valid_domain"))]
    pub host: String,
}

/// The four booleans the worker uses to pick a login UI. Unknown users get
/// the same shape with everything false.
#[derive(Debug, Serialize)]
pub struct UserValidationResponse {
    pub user_exists: bool,
    pub has_passkey: bool,
    pub has_valid_token: bool,
    pub remote_login_allowed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 255), custom(function = "validators::not_blank"))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub display_name: Option<String>,
}

// =============================================================================
// SETUP TOKENS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateSetupTokenRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    /// SHA-512 hex of the claimed token, computed by the worker
    #[validate(length(min = 1))]
    pub token_hash: String,
    #[validate(length(min = 1, max = 64))]
    pub client_ip: String,
}

/// Wire result of `setup-tokens/validate`.
#[derive(Debug, Serialize)]
pub struct SetupTokenValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<TokenUserInfo>,
}

#[derive(Debug, Serialize)]
pub struct TokenUserInfo {
    pub username: String,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueSetupTokenRequest {
    #[validate(custom(function = "validators::valid_domain"))]
    pub host: String,
    pub device_name: Option<String>,
    #[validate(range(min = 1, max = 8760))]
    pub validity_hours: Option<i64>,
    #[validate(range(min = 1, max = 1000))]
    pub max_uses: Option<i32>,
    #[validate(custom(function = "validators::valid_cidr_list"))]
    pub allowed_cidrs: Option<String>,
    pub send_email: Option<bool>,
}

/// Issuance response. `token` is the plain value, shown exactly once.
#[derive(Debug, Serialize)]
pub struct IssuedSetupTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_uses: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
}

// =============================================================================
// EMAIL OTP
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RequestOtpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "validators::valid_domain"))]
    pub host: String,
    /// SHA-256 of the worker-generated `srbt_` browser cookie
    #[validate(length(min = 1))]
    pub browser_token_hash: String,
}

/// Identical shape whether or not the email mapped to an account.
#[derive(Debug, Serialize)]
pub struct OtpRequestResponse {
    pub otp_request_id: String,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateOtpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 32))]
    pub otp_code: String,
    #[validate(length(min = 1, max = 64))]
    pub otp_request_id: String,
    #[validate(length(min = 1))]
    pub browser_token_hash: String,
    #[validate(custom(function = "validators::valid_domain"))]
    pub host: String,
}

#[derive(Debug, Serialize)]
pub struct OtpValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration_s: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

// =============================================================================
// PASSKEYS & AUTH
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPasskeyRequest {
    #[validate(length(min = 1))]
    pub credential_id: String,
    #[validate(length(min = 1))]
    pub public_key: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// rpId the credential was registered under
    #[validate(custom(function = "validators::valid_domain"))]
    pub host_domain: String,
    #[serde(default)]
    pub backup_eligible: bool,
    #[serde(default)]
    pub backup_state: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyAuthRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 1))]
    pub credential_id: String,
    /// Domain the authentication happened on; checked against the
    /// credential's rpId binding
    #[validate(custom(function = "validators::valid_domain"))]
    pub host: String,
    pub client_ip: Option<String>,
}

// =============================================================================
// SESSIONS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    pub host_domain: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub session_id: String,
    pub credential_id: Option<String>,
    pub created_ip: Option<String>,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub csrf_token: Option<String>,
    /// Seconds; defaults to 8 hours
    #[validate(range(min = 60))]
    pub duration: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionCreatedResponse {
    pub success: bool,
    pub session_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRemoteSessionRequest {
    #[validate(length(min = 1, max = 255))]
    pub worker_id: String,
    pub protected_host_id: Uuid,
    pub user_id: Uuid,
    #[validate(range(min = 60))]
    pub session_duration: Option<i64>,
    pub device_info: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RemoteSessionCreatedResponse {
    pub success: bool,
    pub session_id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub session_type: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeSessionRequest {
    pub reason: Option<String>,
}

/// Bulk revocation of a user's sessions; exactly one of the two targets
/// must be set (host → `user-protectedhost`, worker → `user-worker`).
#[derive(Debug, Deserialize)]
pub struct RevokeUserSessionsRequest {
    pub host_domain: Option<String>,
    pub worker_name: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevocationResponse {
    pub success: bool,
    pub revoked_sessions: usize,
    pub cache_cleared: bool,
}

// =============================================================================
// SECURITY EVENTS & WEBHOOKS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SecurityEventRequest {
    /// Must name a declared audit event type; unknown strings are rejected
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    pub severity: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrackWebhookUsageRequest {
    #[validate(length(min = 1))]
    pub token: String,
    pub client_ip: Option<String>,
}

// =============================================================================
// WORKERS & MIGRATION
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterWorkerRequest {
    #[validate(custom(function = "validators::valid_domain"))]
    pub hostname: String,
    #[validate(url)]
    pub worker_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub success: bool,
    /// `re_registered`, `registered`, or `migrated`
    pub result: &'static str,
    pub hostname: String,
    pub worker: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetPendingWorkerRequest {
    #[validate(length(min = 1, max = 255), custom(function = "validators::not_blank"))]
    pub worker_name: String,
}

// =============================================================================
// HOSTS & ADMIN
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateHostRequest {
    #[validate(custom(function = "validators::valid_domain"))]
    pub domain: String,
    #[validate(url)]
    pub backend_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AuthorizeUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
}

/// Timing overrides; at least one field must be present.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTimingRequest {
    #[validate(range(min = 1))]
    pub session_duration_s: Option<i32>,
    #[validate(range(min = 1))]
    pub waf_bypass_revalidation_s: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CacheRefreshRequest {
    pub reason: Option<String>,
}

/// Query parameters of the audit-log listing.
#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub limit: Option<i64>,
    pub event_type: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetConfigParamRequest {
    #[validate(length(min = 1, max = 4096))]
    pub value: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// Comma-separated scopes or `all`
    pub scopes: Option<String>,
    pub description: Option<String>,
    /// Explicit key value; auto-generated when omitted
    pub key: Option<String>,
}

/// The key value appears in full exactly once, here.
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub scopes: String,
    pub is_active: bool,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use shared::validation::validate_request;

    #[test]
    fn test_check_user_request_rejects_empty_username() {
        let req = CheckUserRequest { username: String::new() };
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn test_validate_user_request_rejects_bad_domain() {
        let req = ValidateUserRequest {
            username: "alice".into(),
            host: "https://app.ex.com".into(),
        };
        assert!(validate_request(&req).is_err());

        let req = ValidateUserRequest { username: "alice".into(), host: "app.ex.com".into() };
        assert!(validate_request(&req).is_ok());
    }

    #[test]
    fn test_otp_request_requires_email_shape() {
        let req = RequestOtpRequest {
            email: "not-an-email".into(),
            host: "app.ex.com".into(),
            browser_token_hash: "sha256:abc".into(),
        };
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn test_issue_token_bounds() {
        let req = IssueSetupTokenRequest {
            host: "app.ex.com".into(),
            device_name: None,
            validity_hours: Some(0),
            max_uses: None,
            allowed_cidrs: None,
            send_email: None,
        };
        assert!(validate_request(&req).is_err());

        let req = IssueSetupTokenRequest {
            host: "app.ex.com".into(),
            device_name: Some("Laptop".into()),
            validity_hours: Some(48),
            max_uses: Some(1),
            allowed_cidrs: Some("10.0.0.0/8".into()),
            send_email: Some(false),
        };
        assert!(validate_request(&req).is_ok());
    }

    #[test]
    fn test_security_event_rename() {
        let req: SecurityEventRequest = serde_json::from_str(
            r#"{ "type": "security.cross_domain_session", "details": {"ip": "1.2.3.4"} }"#,
        )
        .unwrap();
        assert_eq!(req.event_type, "security.cross_domain_session");
        assert!(req.severity.is_none());
        assert_eq!(req.details["ip"], "1.2.3.4");
    }

    #[test]
    fn test_session_duration_minimum() {
        let mut req = CreateSessionRequest {
            username: "alice".into(),
            host_domain: None,
            session_id: "s1".into(),
            credential_id: None,
            created_ip: None,
            device_fingerprint: None,
            user_agent: None,
            csrf_token: None,
            duration: Some(30),
        };
        assert!(validate_request(&req).is_err());
        req.duration = Some(3600);
        assert!(validate_request(&req).is_ok());
    }
}
