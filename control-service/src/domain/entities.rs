//! # Control-Plane Entities
//!
//! Persistent business objects of the control plane. Each struct maps
//! directly to a database table; relations are expressed with UUID foreign
//! keys rather than embedded objects.
//!
//! ## Entity Overview
//!
//! ```text
//! ┌──────────┐  M:N   ┌──────────┐  N:1   ┌──────────┐  N:1  ┌──────────┐
//! │   User   │◀──────▶│   Host   │───────▶│  Worker  │──────▶│  ApiKey  │
//! └────┬─────┘        └────┬─────┘        └──────────┘       └──────────┘
//!      │ 1:N               │ 1:N
//!      ▼                   ▼
//! ┌──────────┐        ┌──────────────┐
//! │ Passkey  │        │ WebhookToken │
//! │SetupToken│        │ AccessRule   │
//! │ Session  │        │ EmailOtp     │
//! └──────────┘        └──────────────┘
//! ```
//!
//! ## Versioning
//!
//! Every entity that feeds the worker config snapshot carries a
//! `config_version` timestamp. A database trigger bumps `updated_at` and
//! `config_version` on every UPDATE (strictly monotonic, microsecond
//! tiebreak), so no write path can forget the bump. Workers use the version
//! as a cache key.
//!
//! ## Secret Handling
//!
//! Setup tokens are stored as `sha512:<hex>`, OTP codes and browser tokens
//! as `sha256:<hex>`. The only secrets stored in clear are worker API keys
//! and webhook tokens, which the workers themselves need verbatim.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use shared::validation::parse_line_separated;

// =============================================================================
// USER
// =============================================================================

/// A person allowed to authenticate against one or more protected hosts.
///
/// `username` and `email` are unique. `last_login` and the active-session
/// count are derived from the sessions table, never stored here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    /// Primary key (UUID v4)
    pub id: Uuid,
    /// Unique login name presented to workers
    pub username: String,
    /// Unique email address, used for OTP login and token delivery
    pub email: String,
    /// Optional human-friendly name for UI and config snapshots
    pub display_name: Option<String>,
    /// Deactivate to disable access without deleting history
    pub is_active: bool,
    /// Bumped by trigger on every write; workers use it as a cache key
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Display name with username fallback, as embedded in config snapshots.
    pub fn display_name_or_username(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

// =============================================================================
// HOST
// =============================================================================

/// A customer domain protected by an edge worker.
///
/// The host row is the unit of policy: session timing, WAF bypass, access
/// exceptions, deployment mode and the email/remote login configuration all
/// hang off it. `state` is derived (see [`super::host_state`]) but persisted
/// so the go-live cron can query for deployment hosts cheaply.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    /// Unique domain name (e.g., `app.example.com`)
    pub domain: String,
    /// Backend service URL the worker proxies authenticated requests to
    pub backend_url: String,
    /// When false the host is archived
    pub is_active: bool,
    /// Security lockdown: worker rejects all traffic
    pub block_all_traffic: bool,
    /// Currently bound worker; NULL until a worker first registers
    pub worker_id: Option<Uuid>,

    // Session / WAF timing overrides
    /// Session timeout in seconds (min 60, max `sunray.max_session_duration_s`)
    pub session_duration_s: i32,
    /// Enable WAF bypass cookie for authenticated users
    pub bypass_waf_for_authenticated: bool,
    /// Force WAF-bypass cookie revalidation after this period
    /// (min 60, max `sunray.max_waf_bypass_revalidation_s`)
    pub waf_bypass_revalidation_s: i32,

    // Access exceptions (line-separated text, `#` comments)
    pub allowed_cidrs: Option<String>,
    pub public_url_patterns: Option<String>,
    pub token_url_patterns: Option<String>,

    // Webhook authentication defaults
    pub webhook_header_name: Option<String>,
    pub webhook_param_name: Option<String>,

    // Worker migration
    /// Name of the worker an admin scheduled a migration to. A plain string,
    /// not a foreign key: the target worker may not be registered yet.
    pub pending_worker_name: Option<String>,
    pub migration_requested_at: Option<DateTime<Utc>>,
    pub last_migration_ts: Option<DateTime<Utc>>,

    // Deployment mode
    /// Temporary unverified access before go-live
    pub deployment_mode: bool,
    pub golive_date: Option<NaiveDate>,
    /// TTL of unverified sessions created during deployment mode
    pub deployment_session_ttl: i32,

    // Email OTP login
    pub enable_email_login: bool,
    /// Session duration for email logins; falls back to `session_duration_s`
    pub email_login_session_duration_s: Option<i32>,
    /// OTP validity window in seconds
    pub email_otp_validity_s: i32,

    // Remote authentication (paid path)
    pub remote_auth_enabled: bool,
    pub remote_auth_session_ttl: i32,
    pub remote_auth_max_session_ttl: i32,
    pub session_mgmt_enabled: bool,
    pub session_mgmt_ttl: i32,

    /// Derived protection state, recomputed on write and by the daily cron.
    /// One of: archived, unprotected, locked, deployment, protected.
    pub state: String,

    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// Parsed `allowed_cidrs` entries.
    pub fn allowed_cidr_list(&self) -> Vec<String> {
        parse_line_separated(self.allowed_cidrs.as_deref().unwrap_or(""))
    }

    /// Parsed `public_url_patterns` entries.
    pub fn public_url_pattern_list(&self) -> Vec<String> {
        parse_line_separated(self.public_url_patterns.as_deref().unwrap_or(""))
    }

    /// Parsed `token_url_patterns` entries.
    pub fn token_url_pattern_list(&self) -> Vec<String> {
        parse_line_separated(self.token_url_patterns.as_deref().unwrap_or(""))
    }

    /// Session duration handed out after a successful email-OTP login.
    pub fn email_login_duration_s(&self) -> i32 {
        self.email_login_session_duration_s
            .unwrap_or(self.session_duration_s)
    }

    /// Days until go-live, clamped at zero. Only meaningful in deployment
    /// state; returns 0 otherwise.
    pub fn days_until_golive(&self, today: NaiveDate) -> i64 {
        match self.golive_date {
            Some(date) if self.state == "deployment" => (date - today).num_days().max(0),
            _ => 0,
        }
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// An edge execution unit protecting zero-or-more hosts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    /// Unique name, carried in the `X-Worker-ID` header
    pub name: String,
    /// Deployment flavor, e.g. `cloudflare`
    pub worker_type: String,
    /// Base URL of the worker deployment (informational; cache-clear calls
    /// go to the protected host domains)
    pub worker_url: Option<String>,
    /// API key the worker authenticates with; also used for outbound calls
    /// back to the worker
    pub api_key_id: Uuid,
    pub is_active: bool,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// API KEY
// =============================================================================

/// Bearer credential for worker-to-control-plane (and back) authentication.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    /// Descriptive name for this key
    pub name: String,
    /// 32-byte URL-safe random value, auto-generated when absent
    pub key: String,
    /// Comma-separated `resource:action` scopes, or the literal `all`
    pub scopes: String,
    pub is_active: bool,
    pub description: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Checks whether this key covers `required_scope` (`resource:action`).
    ///
    /// The literal `all` grants everything; `resource:*` and `resource:all`
    /// wildcard over actions.
    pub fn has_scope(&self, required_scope: &str) -> bool {
        if self.scopes.trim() == "all" {
            return true;
        }

        let key_scopes: Vec<&str> = self.scopes.split(',').map(str::trim).collect();

        if key_scopes.contains(&required_scope) {
            return true;
        }

        let resource = required_scope.split(':').next().unwrap_or(required_scope);
        key_scopes
            .iter()
            .any(|s| *s == format!("{resource}:all") || *s == format!("{resource}:*"))
    }

    /// Partial key for display: first 8 and last 4 characters.
    pub fn key_display(&self) -> String {
        if self.key.len() > 16 {
            format!("{}...{}", &self.key[..8], &self.key[self.key.len() - 4..])
        } else if self.key.len() > 4 {
            format!("{}...", &self.key[..4])
        } else {
            self.key.clone()
        }
    }
}

// =============================================================================
// PASSKEY
// =============================================================================

/// A WebAuthn credential registered by a user through a worker.
///
/// `host_domain` binds the credential to the rpId it was registered for and
/// MUST be checked on any use; a NULL value marks a legacy credential that
/// needs re-registration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Passkey {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Unique WebAuthn credential identifier
    pub credential_id: String,
    /// Public key in base64; verification happens at the edge
    pub public_key: String,
    /// User-friendly device name
    pub name: String,
    /// WebAuthn rpId this credential is bound to
    pub host_domain: Option<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_ip: Option<String>,
    pub created_user_agent: Option<String>,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SETUP TOKEN
// =============================================================================

/// Single-use (by default) high-entropy secret bootstrapping passkey
/// enrollment for one user on one host.
///
/// Only the SHA-512 of the plain token is stored; the plain value is shown
/// exactly once at creation time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SetupToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub host_id: Uuid,
    /// `sha512:<hex>` of the plain token
    pub token_hash: String,
    /// Intended device for this token
    pub device_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_date: Option<DateTime<Utc>>,
    pub max_uses: i32,
    pub current_uses: i32,
    /// Line-separated IPs/CIDRs allowed to consume the token (`#` comments)
    pub allowed_cidrs: Option<String>,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SetupToken {
    /// A token is valid iff not consumed, not expired, and under its use cap.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && self.expires_at > now && self.current_uses < self.max_uses
    }

    pub fn allowed_cidr_list(&self) -> Vec<String> {
        parse_line_separated(self.allowed_cidrs.as_deref().unwrap_or(""))
    }
}

// =============================================================================
// EMAIL OTP
// =============================================================================

/// One email-OTP request, bound to a browser via the `srbt_` cookie hash.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailOtp {
    pub id: Uuid,
    /// `otp_req_<hex16>` request identifier returned to the worker
    pub otp_request_id: String,
    /// `sha256:<hex>` of the normalized code
    pub otp_hash: String,
    /// `sha256:<hex>` of the worker-generated `srbt_<hex16>` cookie value
    pub browser_token_hash: String,
    /// Lowercased email the code was sent to
    pub email: String,
    /// NULL when the email did not resolve to an authorized user
    pub user_id: Option<Uuid>,
    pub host_id: Uuid,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Failed validation attempts; lockout at the service-level maximum
    pub attempts: i32,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SESSION
// =============================================================================

/// An edge session recorded by a worker after successful authentication.
///
/// Invariants: while `is_active`, `expires_at > now`; `revoked` implies
/// `!is_active`. Revocation is local-first: the row is updated before any
/// cache-clear fan-out, and fan-out failures never roll it back.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Worker-generated session identifier (unique)
    pub session_id: String,
    pub user_id: Uuid,
    pub host_id: Option<Uuid>,
    /// `normal` or `remote`
    pub session_type: String,
    /// Passkey credential that authenticated this session
    pub credential_id: Option<String>,
    pub is_active: bool,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_ip: Option<String>,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub csrf_token: Option<String>,
    /// JSON device info blob for remote sessions
    pub created_via: Option<String>,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Parses the `created_via` device-info JSON, tolerating legacy garbage.
    pub fn device_info(&self) -> serde_json::Value {
        self.created_via
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// WEBHOOK TOKEN
// =============================================================================

/// Where the worker should look for a webhook token on incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    Header,
    Param,
    Both,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Param => "param",
            Self::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "header" => Some(Self::Header),
            "param" => Some(Self::Param),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Authenticates one external webhook producer on one host.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookToken {
    pub id: Uuid,
    pub host_id: Uuid,
    pub name: String,
    /// 32-char alphanumeric value, auto-generated when absent (unique)
    pub token: String,
    /// `header`, `param` or `both`
    pub token_source: String,
    /// Overrides the host-level webhook header name
    pub header_name: Option<String>,
    /// Overrides the host-level webhook URL parameter name
    pub param_name: Option<String>,
    pub is_active: bool,
    pub allowed_cidrs: Option<String>,
    /// Empty = never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookToken {
    /// Token-source invariant: the named source must have its field set.
    ///
    /// `header` requires `header_name`, `param` requires `param_name`,
    /// `both` requires at least one of the two.
    pub fn source_config_valid(&self) -> bool {
        match TokenSource::parse(&self.token_source) {
            Some(TokenSource::Header) => self.header_name.is_some(),
            Some(TokenSource::Param) => self.param_name.is_some(),
            Some(TokenSource::Both) => self.header_name.is_some() || self.param_name.is_some(),
            None => false,
        }
    }

    /// Active, unexpired, and (when restricted) reachable from `client_ip`.
    pub fn is_valid(&self, now: DateTime<Utc>, client_ip: Option<std::net::IpAddr>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at < now {
                return false;
            }
        }
        let allowed = parse_line_separated(self.allowed_cidrs.as_deref().unwrap_or(""));
        if let (Some(ip), false) = (client_ip, allowed.is_empty()) {
            if !shared::validation::ip_in_list(ip, &allowed) {
                return false;
            }
        }
        true
    }

    pub fn allowed_cidr_list(&self) -> Vec<String> {
        parse_line_separated(self.allowed_cidrs.as_deref().unwrap_or(""))
    }
}

// =============================================================================
// ACCESS RULE
// =============================================================================

/// Typed access exception attached to a host; workers evaluate the composed
/// exception tree during request handling.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessRule {
    pub id: Uuid,
    pub host_id: Uuid,
    /// Rule discriminator, e.g. `cidr`, `public_url`, `token_url`
    pub rule_type: String,
    pub rule_value: String,
    pub description: Option<String>,
    pub is_active: bool,
    /// Evaluation order, lowest first
    pub priority: i32,
    pub config_version: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// AUDIT LOG ENTRY
// =============================================================================

/// One immutable row of the append-only audit stream.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// One of the declared taxonomy strings (enforced by the append API)
    pub event_type: String,
    pub severity: String,
    pub sunray_user_id: Option<Uuid>,
    /// Kept even if the user row is later deleted
    pub username: Option<String>,
    pub admin_user_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub sunray_worker: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub event_source: Option<String>,
    /// Structured details, stored as JSON text
    pub details: Option<String>,
}

impl AuditLogEntry {
    /// Parses the details JSON, falling back to a `{"raw": …}` wrapper.
    pub fn details_value(&self) -> serde_json::Value {
        match self.details.as_deref() {
            None | Some("") => serde_json::Value::Null,
            Some(raw) => serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::json!({ "raw": raw })),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_key(scopes: &str) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            name: "test".into(),
            key: "k".repeat(43),
            scopes: scopes.into(),
            is_active: true,
            description: None,
            last_used: None,
            usage_count: 0,
            config_version: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_api_key_all_scope_grants_everything() {
        let key = sample_key("all");
        assert!(key.has_scope("config:read"));
        assert!(key.has_scope("session:write"));
    }

    #[test]
    fn test_api_key_exact_scope_match() {
        let key = sample_key("config:read, session:write");
        assert!(key.has_scope("config:read"));
        assert!(key.has_scope("session:write"));
        assert!(!key.has_scope("session:read"));
    }

    #[test]
    fn test_api_key_wildcard_scope() {
        let key = sample_key("session:*");
        assert!(key.has_scope("session:read"));
        assert!(key.has_scope("session:write"));
        assert!(!key.has_scope("config:read"));

        let key = sample_key("user:all");
        assert!(key.has_scope("user:write"));
    }

    #[test]
    fn test_api_key_display_masks_middle() {
        let key = sample_key("all");
        let shown = key.key_display();
        assert!(shown.starts_with(&key.key[..8]));
        assert!(shown.contains("..."));
        assert!(shown.len() < key.key.len());
    }

    #[test]
    fn test_setup_token_validity() {
        let now = Utc::now();
        let mut token = SetupToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            token_hash: "sha512:abc".into(),
            device_name: Some("Laptop".into()),
            expires_at: now + Duration::hours(48),
            consumed: false,
            consumed_date: None,
            max_uses: 1,
            current_uses: 0,
            allowed_cidrs: None,
            config_version: now,
            created_at: now,
            updated_at: now,
        };
        assert!(token.is_valid(now));

        token.current_uses = 1;
        assert!(!token.is_valid(now));

        token.current_uses = 0;
        token.consumed = true;
        assert!(!token.is_valid(now));

        token.consumed = false;
        assert!(!token.is_valid(now + Duration::hours(49)));
    }

    #[test]
    fn test_webhook_token_source_invariant() {
        let now = Utc::now();
        let mut token = WebhookToken {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            name: "github".into(),
            token: "t".repeat(32),
            token_source: "header".into(),
            header_name: Some("X-Hub-Signature".into()),
            param_name: None,
            is_active: true,
            allowed_cidrs: None,
            expires_at: None,
            last_used: None,
            usage_count: 0,
            config_version: now,
            created_at: now,
            updated_at: now,
        };
        assert!(token.source_config_valid());

        token.header_name = None;
        assert!(!token.source_config_valid());

        token.token_source = "param".into();
        token.param_name = Some("hook_token".into());
        assert!(token.source_config_valid());

        token.token_source = "both".into();
        assert!(token.source_config_valid());
        token.param_name = None;
        assert!(!token.source_config_valid());

        token.token_source = "cookie".into();
        assert!(!token.source_config_valid());
    }

    #[test]
    fn test_webhook_token_validity_checks() {
        let now = Utc::now();
        let mut token = WebhookToken {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            name: "ci".into(),
            token: "t".repeat(32),
            token_source: "param".into(),
            header_name: None,
            param_name: Some("token".into()),
            is_active: true,
            allowed_cidrs: Some("10.0.0.0/8".into()),
            expires_at: Some(now + Duration::days(1)),
            last_used: None,
            usage_count: 0,
            config_version: now,
            created_at: now,
            updated_at: now,
        };

        let inside: std::net::IpAddr = "10.1.2.3".parse().unwrap();
        let outside: std::net::IpAddr = "192.0.2.1".parse().unwrap();

        assert!(token.is_valid(now, Some(inside)));
        assert!(!token.is_valid(now, Some(outside)));
        assert!(!token.is_valid(now + Duration::days(2), Some(inside)));

        token.is_active = false;
        assert!(!token.is_valid(now, Some(inside)));
    }

    #[test]
    fn test_host_line_separated_helpers() {
        let now = Utc::now();
        let host = Host {
            id: Uuid::new_v4(),
            domain: "app.example.com".into(),
            backend_url: "https://backend.internal".into(),
            is_active: true,
            block_all_traffic: false,
            worker_id: None,
            session_duration_s: 3600,
            bypass_waf_for_authenticated: false,
            waf_bypass_revalidation_s: 900,
            allowed_cidrs: Some("10.0.0.0/8 # vpn\n# none else".into()),
            public_url_patterns: Some("/health\n/static/*".into()),
            token_url_patterns: None,
            webhook_header_name: Some("X-Sunray-Webhook-Token".into()),
            webhook_param_name: Some("sunray_token".into()),
            pending_worker_name: None,
            migration_requested_at: None,
            last_migration_ts: None,
            deployment_mode: false,
            golive_date: None,
            deployment_session_ttl: 7200,
            enable_email_login: true,
            email_login_session_duration_s: None,
            email_otp_validity_s: 300,
            remote_auth_enabled: false,
            remote_auth_session_ttl: 3600,
            remote_auth_max_session_ttl: 7200,
            session_mgmt_enabled: true,
            session_mgmt_ttl: 120,
            state: "unprotected".into(),
            config_version: now,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(host.allowed_cidr_list(), vec!["10.0.0.0/8"]);
        assert_eq!(host.public_url_pattern_list(), vec!["/health", "/static/*"]);
        assert!(host.token_url_pattern_list().is_empty());
        // Email login falls back to the host session duration
        assert_eq!(host.email_login_duration_s(), 3600);
    }

    #[test]
    fn test_days_until_golive_clamped() {
        let now = Utc::now();
        let today = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap().date_naive();
        let mut host = Host {
            id: Uuid::new_v4(),
            domain: "d.example.com".into(),
            backend_url: "https://b".into(),
            is_active: true,
            block_all_traffic: false,
            worker_id: Some(Uuid::new_v4()),
            session_duration_s: 3600,
            bypass_waf_for_authenticated: false,
            waf_bypass_revalidation_s: 900,
            allowed_cidrs: None,
            public_url_patterns: None,
            token_url_patterns: None,
            webhook_header_name: None,
            webhook_param_name: None,
            pending_worker_name: None,
            migration_requested_at: None,
            last_migration_ts: None,
            deployment_mode: true,
            golive_date: Some(today + Duration::days(12)),
            deployment_session_ttl: 7200,
            enable_email_login: false,
            email_login_session_duration_s: None,
            email_otp_validity_s: 300,
            remote_auth_enabled: false,
            remote_auth_session_ttl: 3600,
            remote_auth_max_session_ttl: 7200,
            session_mgmt_enabled: true,
            session_mgmt_ttl: 120,
            state: "deployment".into(),
            config_version: now,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(host.days_until_golive(today), 12);

        // Past go-live clamps to zero
        host.golive_date = Some(today - Duration::days(3));
        assert_eq!(host.days_until_golive(today), 0);

        // Outside deployment state it is always zero
        host.state = "protected".into();
        host.golive_date = Some(today + Duration::days(5));
        assert_eq!(host.days_until_golive(today), 0);
    }

    #[test]
    fn test_session_device_info_tolerates_garbage() {
        let now = Utc::now();
        let mut session = Session {
            id: Uuid::new_v4(),
            session_id: "sess_1".into(),
            user_id: Uuid::new_v4(),
            host_id: None,
            session_type: "remote".into(),
            credential_id: None,
            is_active: true,
            revoked: false,
            revoked_reason: None,
            expires_at: now + Duration::hours(1),
            last_activity: None,
            created_ip: None,
            device_fingerprint: None,
            user_agent: None,
            csrf_token: None,
            created_via: Some(r#"{"ip_address":"1.2.3.4"}"#.into()),
            config_version: now,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(session.device_info()["ip_address"], "1.2.3.4");

        session.created_via = Some("not json".into());
        assert!(session.device_info().is_null());
    }

    #[test]
    fn test_audit_entry_details_fallback() {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: "auth.success".into(),
            severity: "info".into(),
            sunray_user_id: None,
            username: None,
            admin_user_id: None,
            api_key_id: None,
            sunray_worker: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            event_source: None,
            details: Some("{broken".into()),
        };
        assert_eq!(entry.details_value()["raw"], "{broken");
    }
}
