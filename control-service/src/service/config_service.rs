//! # Config Snapshot
//!
//! Builds the full configuration document a worker needs: active users with
//! their passkeys, active hosts with authorized users, access exceptions,
//! webhook tokens, remote-auth and deployment-mode settings. The snapshot
//! is the authority; workers reconcile their local caches to it, using the
//! per-entity `config_version` timestamps as invalidation triggers.
//!
//! The document assembly is a pure function over pre-fetched rows
//! ([`build_snapshot`]) so its shape is testable without a database.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use shared::errors::ApiError;
use tracing::instrument;

use crate::domain::entities::{Host, Passkey, User, WebhookToken};
use crate::domain::events::{AuditEvent, AuditEventType};
use crate::repository::settings_repository::keys;
use crate::repository::{
    AuditRepository, HostRepository, PasskeyRepository, SettingsRepository, UserRepository,
    WebhookRepository,
};

/// Wire version of the snapshot document.
pub const CONFIG_VERSION: i64 = 3;

/// One user plus their passkeys, pre-fetched for the builder.
#[derive(Debug, Clone)]
pub struct SnapshotUser {
    pub user: User,
    pub passkeys: Vec<Passkey>,
}

/// One host plus its authorized users and webhook tokens, pre-fetched.
#[derive(Debug, Clone)]
pub struct SnapshotHost {
    pub host: Host,
    pub authorized_users: Vec<String>,
    pub webhook_tokens: Vec<WebhookToken>,
}

/// Process-wide remote-auth parameters embedded per host.
#[derive(Debug, Clone, Copy)]
pub struct RemoteAuthParams {
    pub polling_interval: i64,
    pub challenge_ttl: i64,
}

// =============================================================================
// PURE BUILDER
// =============================================================================

/// Assembles the worker-consumable configuration document.
///
/// Inclusion rules: only active users and hosts reach this function (the
/// repositories filter); webhook tokens are additionally checked for
/// validity (active, unexpired) here.
pub fn build_snapshot(
    users: &[SnapshotUser],
    hosts: &[SnapshotHost],
    remote_auth: RemoteAuthParams,
    generated_at: DateTime<Utc>,
    today: NaiveDate,
) -> Value {
    let mut user_map = serde_json::Map::new();
    for entry in users {
        let passkeys: Vec<Value> = entry
            .passkeys
            .iter()
            .map(|p| {
                json!({
                    "credential_id": p.credential_id,
                    "public_key": p.public_key,
                    "name": p.name,
                    "created_at": p.created_at.to_rfc3339(),
                    "backup_eligible": p.backup_eligible,
                    "backup_state": p.backup_state,
                })
            })
            .collect();

        user_map.insert(
            entry.user.username.clone(),
            json!({
                "email": entry.user.email,
                "display_name": entry.user.display_name_or_username(),
                "created_at": entry.user.created_at.to_rfc3339(),
                "passkeys": passkeys,
            }),
        );
    }

    let host_list: Vec<Value> = hosts
        .iter()
        .map(|entry| {
            let host = &entry.host;

            let webhook_tokens: Vec<Value> = entry
                .webhook_tokens
                .iter()
                .filter(|t| t.is_valid(generated_at, None) && t.source_config_valid())
                .map(|t| {
                    json!({
                        "token": t.token,
                        "name": t.name,
                        "allowed_cidrs": t.allowed_cidr_list(),
                        "expires_at": t.expires_at.map(|e| e.to_rfc3339()),
                        "header_name": t.header_name,
                        "param_name": t.param_name,
                        "token_source": t.token_source,
                    })
                })
                .collect();

            json!({
                "domain": host.domain,
                "backend": host.backend_url,
                "authorized_users": entry.authorized_users,
                "allowed_cidrs": host.allowed_cidr_list(),
                "public_url_patterns": host.public_url_pattern_list(),
                "token_url_patterns": host.token_url_pattern_list(),
                "session_duration_override": host.session_duration_s,
                "webhook_header_name": host.webhook_header_name,
                "webhook_param_name": host.webhook_param_name,
                "webhook_tokens": webhook_tokens,
                "remote_auth": {
                    "enabled": host.remote_auth_enabled,
                    "session_ttl": host.remote_auth_session_ttl,
                    "max_session_ttl": host.remote_auth_max_session_ttl,
                    "session_mgmt_enabled": host.session_mgmt_enabled,
                    "session_mgmt_ttl": host.session_mgmt_ttl,
                    "polling_interval": remote_auth.polling_interval,
                    "challenge_ttl": remote_auth.challenge_ttl,
                },
                "deployment_mode": {
                    "enabled": host.deployment_mode,
                    "golive_date": host.golive_date.map(|d| d.to_string()),
                    "days_until_golive": host.days_until_golive(today),
                    "session_ttl": host.deployment_session_ttl,
                },
            })
        })
        .collect();

    json!({
        "version": CONFIG_VERSION,
        "generated_at": generated_at.to_rfc3339(),
        "users": Value::Object(user_map),
        "hosts": host_list,
    })
}

// =============================================================================
// CONFIG SERVICE
// =============================================================================

/// Fetches snapshot inputs and serves the assembled document.
#[derive(Clone)]
pub struct ConfigService {
    users: UserRepository,
    passkeys: PasskeyRepository,
    hosts: HostRepository,
    webhooks: WebhookRepository,
    settings: SettingsRepository,
    audit: AuditRepository,
}

impl ConfigService {
    pub fn new(
        users: UserRepository,
        passkeys: PasskeyRepository,
        hosts: HostRepository,
        webhooks: WebhookRepository,
        settings: SettingsRepository,
        audit: AuditRepository,
    ) -> Self {
        Self { users, passkeys, hosts, webhooks, settings, audit }
    }

    /// Builds the full snapshot and records the fetch.
    #[instrument(skip(self))]
    pub async fn snapshot(
        &self,
        worker_name: Option<String>,
        client_ip: Option<String>,
    ) -> Result<Value, ApiError> {
        let mut users = Vec::new();
        for user in self.users.list_active().await? {
            let passkeys = self.passkeys.list_for_user(user.id).await?;
            users.push(SnapshotUser { user, passkeys });
        }

        let mut hosts = Vec::new();
        for host in self.hosts.list_active().await? {
            let authorized_users = self.hosts.authorized_usernames(host.id).await?;
            let webhook_tokens = self.webhooks.list_active_for_host(host.id).await?;
            hosts.push(SnapshotHost { host, authorized_users, webhook_tokens });
        }

        let remote_auth = RemoteAuthParams {
            polling_interval: self
                .settings
                .get_i64(
                    keys::REMOTE_AUTH_POLLING_INTERVAL,
                    keys::DEFAULT_REMOTE_AUTH_POLLING_INTERVAL,
                )
                .await?,
            challenge_ttl: self
                .settings
                .get_i64(
                    keys::REMOTE_AUTH_CHALLENGE_TTL,
                    keys::DEFAULT_REMOTE_AUTH_CHALLENGE_TTL,
                )
                .await?,
        };

        let now = Utc::now();
        let snapshot = build_snapshot(&users, &hosts, remote_auth, now, now.date_naive());

        let mut audit = AuditEvent::new(AuditEventType::ConfigFetched)
            .ip(client_ip)
            .details(json!({ "worker_id": worker_name }));
        if let Some(name) = &worker_name {
            audit = audit.worker(name);
        }
        self.audit.append(audit).await?;

        Ok(snapshot)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn user(username: &str, email: &str, display_name: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            display_name: display_name.map(Into::into),
            is_active: true,
            config_version: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn passkey(user_id: Uuid, credential_id: &str) -> Passkey {
        let now = Utc::now();
        Passkey {
            id: Uuid::new_v4(),
            user_id,
            credential_id: credential_id.into(),
            public_key: "pk_base64".into(),
            name: "Laptop".into(),
            host_domain: Some("app.ex.com".into()),
            backup_eligible: true,
            backup_state: false,
            last_used: None,
            created_ip: None,
            created_user_agent: None,
            config_version: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn host(domain: &str) -> Host {
        let now = Utc::now();
        Host {
            id: Uuid::new_v4(),
            domain: domain.into(),
            backend_url: "https://backend.internal".into(),
            is_active: true,
            block_all_traffic: false,
            worker_id: Some(Uuid::new_v4()),
            session_duration_s: 3600,
            bypass_waf_for_authenticated: false,
            waf_bypass_revalidation_s: 900,
            allowed_cidrs: Some("10.0.0.0/8".into()),
            public_url_patterns: Some("/health".into()),
            token_url_patterns: None,
            webhook_header_name: Some("X-Sunray-Webhook-Token".into()),
            webhook_param_name: Some("sunray_token".into()),
            pending_worker_name: None,
            migration_requested_at: None,
            last_migration_ts: None,
            deployment_mode: false,
            golive_date: None,
            deployment_session_ttl: 7200,
            enable_email_login: false,
            email_login_session_duration_s: None,
            email_otp_validity_s: 300,
            remote_auth_enabled: true,
            remote_auth_session_ttl: 3600,
            remote_auth_max_session_ttl: 7200,
            session_mgmt_enabled: true,
            session_mgmt_ttl: 120,
            state: "protected".into(),
            config_version: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn webhook(host_id: Uuid, name: &str, expires_at: Option<DateTime<Utc>>) -> WebhookToken {
        let now = Utc::now();
        WebhookToken {
            id: Uuid::new_v4(),
            host_id,
            name: name.into(),
            token: "t".repeat(32),
            token_source: "header".into(),
            header_name: Some("X-Hub-Signature".into()),
            param_name: None,
            is_active: true,
            allowed_cidrs: None,
            expires_at,
            last_used: None,
            usage_count: 0,
            config_version: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn params() -> RemoteAuthParams {
        RemoteAuthParams { polling_interval: 3, challenge_ttl: 120 }
    }

    #[test]
    fn test_snapshot_top_level_shape() {
        let now = Utc::now();
        let snapshot = build_snapshot(&[], &[], params(), now, now.date_naive());

        assert_eq!(snapshot["version"], CONFIG_VERSION);
        assert!(snapshot["generated_at"].is_string());
        assert!(snapshot["users"].is_object());
        assert!(snapshot["hosts"].is_array());
    }

    #[test]
    fn test_users_keyed_by_username_with_passkeys() {
        let alice = user("alice", "alice@ex.com", Some("Alice"));
        let key = passkey(alice.id, "cred_1");
        let now = Utc::now();

        let snapshot = build_snapshot(
            &[SnapshotUser { user: alice, passkeys: vec![key] }],
            &[],
            params(),
            now,
            now.date_naive(),
        );

        let entry = &snapshot["users"]["alice"];
        assert_eq!(entry["email"], "alice@ex.com");
        assert_eq!(entry["display_name"], "Alice");
        assert_eq!(entry["passkeys"][0]["credential_id"], "cred_1");
        assert_eq!(entry["passkeys"][0]["backup_eligible"], true);
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let bob = user("bob", "bob@ex.com", None);
        let now = Utc::now();
        let snapshot = build_snapshot(
            &[SnapshotUser { user: bob, passkeys: vec![] }],
            &[],
            params(),
            now,
            now.date_naive(),
        );
        assert_eq!(snapshot["users"]["bob"]["display_name"], "bob");
    }

    #[test]
    fn test_host_entry_shape() {
        let h = host("app.ex.com");
        let host_id = h.id;
        let now = Utc::now();

        let snapshot = build_snapshot(
            &[],
            &[SnapshotHost {
                host: h,
                authorized_users: vec!["alice".into()],
                webhook_tokens: vec![webhook(host_id, "github", None)],
            }],
            params(),
            now,
            now.date_naive(),
        );

        let entry = &snapshot["hosts"][0];
        assert_eq!(entry["domain"], "app.ex.com");
        assert_eq!(entry["backend"], "https://backend.internal");
        assert_eq!(entry["authorized_users"], json!(["alice"]));
        assert_eq!(entry["allowed_cidrs"], json!(["10.0.0.0/8"]));
        assert_eq!(entry["session_duration_override"], 3600);
        assert_eq!(entry["webhook_tokens"][0]["name"], "github");
        assert_eq!(entry["webhook_tokens"][0]["token_source"], "header");
        assert_eq!(entry["remote_auth"]["enabled"], true);
        assert_eq!(entry["remote_auth"]["polling_interval"], 3);
        assert_eq!(entry["remote_auth"]["challenge_ttl"], 120);
        assert_eq!(entry["deployment_mode"]["enabled"], false);
        assert_eq!(entry["deployment_mode"]["session_ttl"], 7200);
    }

    #[test]
    fn test_expired_webhook_tokens_are_excluded() {
        let h = host("app.ex.com");
        let host_id = h.id;
        let now = Utc::now();

        let snapshot = build_snapshot(
            &[],
            &[SnapshotHost {
                host: h,
                authorized_users: vec![],
                webhook_tokens: vec![
                    webhook(host_id, "live", Some(now + Duration::days(1))),
                    webhook(host_id, "stale", Some(now - Duration::days(1))),
                ],
            }],
            params(),
            now,
            now.date_naive(),
        );

        let tokens = snapshot["hosts"][0]["webhook_tokens"].as_array().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0]["name"], "live");
    }

    #[test]
    fn test_deployment_mode_block_counts_days() {
        let mut h = host("app.ex.com");
        h.deployment_mode = true;
        h.state = "deployment".into();
        let now = Utc::now();
        let today = now.date_naive();
        h.golive_date = Some(today + Duration::days(7));

        let snapshot = build_snapshot(
            &[],
            &[SnapshotHost { host: h, authorized_users: vec![], webhook_tokens: vec![] }],
            params(),
            now,
            today,
        );

        let block = &snapshot["hosts"][0]["deployment_mode"];
        assert_eq!(block["enabled"], true);
        assert_eq!(block["days_until_golive"], 7);
        assert!(block["golive_date"].is_string());
    }
}
