//! # Audit Event Taxonomy
//!
//! The audit log accepts a **closed** set of event types. The set is modeled
//! as an exhaustive enum so that producing an undeclared event type is a
//! compile error rather than a deployment-time surprise; worker-reported
//! events arrive as strings and go through [`AuditEventType::from_str`],
//! which rejects anything outside the taxonomy.
//!
//! Adding an event type means adding a variant here and wiring it in
//! `as_str`/`ALL` - the `test_taxonomy_round_trips` test keeps the three in
//! sync.
//!
//! ## Severity
//!
//! | Level | Use |
//! |-------|-----|
//! | `info` | Normal operations (logins, config fetches) |
//! | `warning` | Suspicious but recoverable (OTP lockout, browser mismatch) |
//! | `error` | Failures needing attention (cache clear failed, email error) |
//! | `critical` | Blast-radius events (nuclear cache clear) |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// EVENT TYPES
// =============================================================================

/// Closed enumeration of every event the audit log can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEventType {
    // Authentication
    AuthSuccess,
    AuthFailure,
    SetupTokenGenerated,
    SetupTokenConsumed,
    EmailOtpRequested,
    EmailOtpRequestedUnknown,
    EmailOtpValidated,
    EmailOtpFailed,
    EmailOtpExpired,
    EmailOtpCleanup,
    // Security observations
    EmailOtpLockout,
    EmailOtpBrowserMismatch,
    CrossDomainSession,
    HostIdMismatch,
    UnmanagedHostAccess,
    // Passkeys
    PasskeyRegistered,
    PasskeyRevoked,
    // Sessions
    SessionCreated,
    SessionRevoked,
    SessionExpired,
    SessionBulkRevocation,
    // Edge cache invalidation
    CacheCleared,
    CacheClearFailed,
    CacheNuclearClear,
    // Configuration
    SessionDurationChanged,
    WafRevalidationChanged,
    ConfigFetched,
    // Worker lifecycle
    WorkerRegistered,
    WorkerReRegistered,
    WorkerMigrated,
    WorkerMigrationRequested,
    WorkerMigrationCancelled,
    WorkerRegistrationConflict,
    // API keys
    ApiKeyCreated,
    ApiKeyRegenerated,
    ApiKeyDeleted,
    // Webhook tokens
    WebhookUsed,
    WebhookRegenerated,
    // Token email delivery
    TokenEmailSent,
    TokenEmailNoTemplate,
    TokenEmailNoRecipient,
    TokenEmailError,
    // User validation
    UserValidationSuccess,
    UserValidationUnknownUser,
    // Host lifecycle
    HostGoliveTransition,
    HostUserAuthorized,
    // Remote authentication (paid path)
    RemoteAuthSessionCreated,
    RemoteAuthSessionListed,
    RemoteAuthSessionTerminated,
    // Housekeeping
    AuditRetention,
}

impl AuditEventType {
    /// The wire/storage representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth.success",
            Self::AuthFailure => "auth.failure",
            Self::SetupTokenGenerated => "auth.setup_token_generated",
            Self::SetupTokenConsumed => "auth.setup_token_consumed",
            Self::EmailOtpRequested => "auth.email_otp_requested",
            Self::EmailOtpRequestedUnknown => "auth.email_otp_requested_unknown",
            Self::EmailOtpValidated => "auth.email_otp_validated",
            Self::EmailOtpFailed => "auth.email_otp_failed",
            Self::EmailOtpExpired => "auth.email_otp_expired",
            Self::EmailOtpCleanup => "auth.email_otp_cleanup",
            Self::EmailOtpLockout => "security.email_otp_lockout",
            Self::EmailOtpBrowserMismatch => "security.email_otp_browser_mismatch",
            Self::CrossDomainSession => "security.cross_domain_session",
            Self::HostIdMismatch => "security.host_id_mismatch",
            Self::UnmanagedHostAccess => "security.unmanaged_host_access",
            Self::PasskeyRegistered => "passkey.registered",
            Self::PasskeyRevoked => "passkey.revoked",
            Self::SessionCreated => "session.created",
            Self::SessionRevoked => "session.revoked",
            Self::SessionExpired => "session.expired",
            Self::SessionBulkRevocation => "session.bulk_revocation",
            Self::CacheCleared => "cache.cleared",
            Self::CacheClearFailed => "cache.clear_failed",
            Self::CacheNuclearClear => "cache.nuclear_clear",
            Self::SessionDurationChanged => "config.session_duration_changed",
            Self::WafRevalidationChanged => "config.waf_revalidation_changed",
            Self::ConfigFetched => "config.fetched",
            Self::WorkerRegistered => "worker.registered",
            Self::WorkerReRegistered => "worker.re_registered",
            Self::WorkerMigrated => "worker.migrated",
            Self::WorkerMigrationRequested => "worker.migration_requested",
            Self::WorkerMigrationCancelled => "worker.migration_cancelled",
            Self::WorkerRegistrationConflict => "worker.registration_conflict",
            Self::ApiKeyCreated => "api_key.created",
            Self::ApiKeyRegenerated => "api_key.regenerated",
            Self::ApiKeyDeleted => "api_key.deleted",
            Self::WebhookUsed => "webhook.used",
            Self::WebhookRegenerated => "webhook.regenerated",
            Self::TokenEmailSent => "token.email.sent",
            Self::TokenEmailNoTemplate => "token.email.no_template",
            Self::TokenEmailNoRecipient => "token.email.no_recipient",
            Self::TokenEmailError => "token.email.error",
            Self::UserValidationSuccess => "user.validation.success",
            Self::UserValidationUnknownUser => "user.validation.unknown_user",
            Self::HostGoliveTransition => "host.golive_transition",
            Self::HostUserAuthorized => "host.user_authorized",
            Self::RemoteAuthSessionCreated => "remote_auth.session_created",
            Self::RemoteAuthSessionListed => "remote_auth.session_listed",
            Self::RemoteAuthSessionTerminated => "remote_auth.session_terminated",
            Self::AuditRetention => "audit.retention",
        }
    }

    /// All declared event types, used for exhaustiveness tests and the
    /// `from_str` reverse mapping.
    pub const ALL: [AuditEventType; 50] = [
        Self::AuthSuccess,
        Self::AuthFailure,
        Self::SetupTokenGenerated,
        Self::SetupTokenConsumed,
        Self::EmailOtpRequested,
        Self::EmailOtpRequestedUnknown,
        Self::EmailOtpValidated,
        Self::EmailOtpFailed,
        Self::EmailOtpExpired,
        Self::EmailOtpCleanup,
        Self::EmailOtpLockout,
        Self::EmailOtpBrowserMismatch,
        Self::CrossDomainSession,
        Self::HostIdMismatch,
        Self::UnmanagedHostAccess,
        Self::PasskeyRegistered,
        Self::PasskeyRevoked,
        Self::SessionCreated,
        Self::SessionRevoked,
        Self::SessionExpired,
        Self::SessionBulkRevocation,
        Self::CacheCleared,
        Self::CacheClearFailed,
        Self::CacheNuclearClear,
        Self::SessionDurationChanged,
        Self::WafRevalidationChanged,
        Self::ConfigFetched,
        Self::WorkerRegistered,
        Self::WorkerReRegistered,
        Self::WorkerMigrated,
        Self::WorkerMigrationRequested,
        Self::WorkerMigrationCancelled,
        Self::WorkerRegistrationConflict,
        Self::ApiKeyCreated,
        Self::ApiKeyRegenerated,
        Self::ApiKeyDeleted,
        Self::WebhookUsed,
        Self::WebhookRegenerated,
        Self::TokenEmailSent,
        Self::TokenEmailNoTemplate,
        Self::TokenEmailNoRecipient,
        Self::TokenEmailError,
        Self::UserValidationSuccess,
        Self::UserValidationUnknownUser,
        Self::HostGoliveTransition,
        Self::HostUserAuthorized,
        Self::RemoteAuthSessionCreated,
        Self::RemoteAuthSessionListed,
        Self::RemoteAuthSessionTerminated,
        Self::AuditRetention,
    ];
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = UnknownEventType;

    /// Parses a wire string back into the taxonomy. Worker-reported security
    /// events go through this; unknown strings are rejected with 400.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Error returned when a string does not name a declared event type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown audit event type: {0}")]
pub struct UnknownEventType(pub String);

// =============================================================================
// SEVERITY
// =============================================================================

/// Severity attached to every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// EVENT BUILDER
// =============================================================================

/// A fully described audit event, ready for the append-only store.
///
/// Built with a fluent API so call sites only mention the fields they have:
///
/// ```rust,ignore
/// audit.append(
///     AuditEvent::new(AuditEventType::SetupTokenConsumed)
///         .user(user.id, &user.username)
///         .ip(client_ip)
///         .details(json!({ "token_id": token.id })),
/// ).await?;
/// ```
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub sunray_user_id: Option<Uuid>,
    pub username: Option<String>,
    pub admin_user_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub sunray_worker: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub event_source: Option<String>,
}

impl AuditEvent {
    /// Starts a new event at `info` severity with empty details.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            severity: Severity::Info,
            details: serde_json::Value::Null,
            sunray_user_id: None,
            username: None,
            admin_user_id: None,
            api_key_id: None,
            sunray_worker: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            event_source: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Attributes the event to a platform user.
    pub fn user(mut self, user_id: Uuid, username: &str) -> Self {
        self.sunray_user_id = Some(user_id);
        self.username = Some(username.to_string());
        self
    }

    pub fn admin(mut self, admin_user_id: Uuid) -> Self {
        self.admin_user_id = Some(admin_user_id);
        self
    }

    pub fn api_key(mut self, api_key_id: Uuid) -> Self {
        self.api_key_id = Some(api_key_id);
        self
    }

    pub fn worker(mut self, worker_name: &str) -> Self {
        self.sunray_worker = Some(worker_name.to_string());
        self
    }

    pub fn ip(mut self, ip_address: impl Into<Option<String>>) -> Self {
        self.ip_address = ip_address.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<Option<String>>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn request_id(mut self, request_id: impl Into<Option<String>>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn source(mut self, event_source: &str) -> Self {
        self.event_source = Some(event_source.to_string());
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_taxonomy_round_trips() {
        // Every declared type must parse back to itself; this keeps ALL,
        // as_str and from_str in sync when variants are added.
        for event in AuditEventType::ALL {
            let parsed: AuditEventType = event.as_str().parse().unwrap();
            assert_eq!(parsed, event);
        }
    }

    #[test]
    fn test_taxonomy_has_no_duplicates() {
        let strings: HashSet<&str> = AuditEventType::ALL.iter().map(|e| e.as_str()).collect();
        assert_eq!(strings.len(), AuditEventType::ALL.len());
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let result = "session.hijacked".parse::<AuditEventType>();
        assert_eq!(result, Err(UnknownEventType("session.hijacked".to_string())));
    }

    #[test]
    fn test_known_wire_strings() {
        assert_eq!(AuditEventType::SetupTokenConsumed.as_str(), "auth.setup_token_consumed");
        assert_eq!(AuditEventType::CacheNuclearClear.as_str(), "cache.nuclear_clear");
        assert_eq!(AuditEventType::EmailOtpBrowserMismatch.as_str(), "security.email_otp_browser_mismatch");
        assert_eq!(
            "worker.re_registered".parse::<AuditEventType>().unwrap(),
            AuditEventType::WorkerReRegistered
        );
    }

    #[test]
    fn test_severity_round_trip() {
        for s in [Severity::Info, Severity::Warning, Severity::Error, Severity::Critical] {
            assert_eq!(s.as_str().parse::<Severity>().unwrap(), s);
        }
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_event_builder_defaults() {
        let event = AuditEvent::new(AuditEventType::ConfigFetched);
        assert_eq!(event.severity, Severity::Info);
        assert!(event.details.is_null());
        assert!(event.username.is_none());
    }

    #[test]
    fn test_event_builder_chaining() {
        let user_id = Uuid::new_v4();
        let event = AuditEvent::new(AuditEventType::SessionRevoked)
            .severity(Severity::Warning)
            .user(user_id, "alice")
            .worker("prod-worker-001")
            .ip(Some("1.2.3.4".to_string()))
            .details(serde_json::json!({ "session_id": "s1" }));

        assert_eq!(event.sunray_user_id, Some(user_id));
        assert_eq!(event.username.as_deref(), Some("alice"));
        assert_eq!(event.sunray_worker.as_deref(), Some("prod-worker-001"));
        assert_eq!(event.details["session_id"], "s1");
    }
}
