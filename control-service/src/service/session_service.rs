//! # Session & Revocation Engine
//!
//! Session lifecycle plus the revocation fan-out to edge workers.
//!
//! ## Local-first revocation
//!
//! Every revocation commits to the store before any worker RPC is
//! attempted. For session-revocation flows, a fan-out failure degrades
//! gracefully (audited as `cache.clear_failed`, edges converge through
//! their next snapshot pull); only explicit admin refresh flows surface
//! worker failures to the caller.
//!
//! ## Scope selection
//!
//! | flow | scope |
//! |------|-------|
//! | revoke one session | `user-session` |
//! | revoke user on host | `user-protectedhost` |
//! | revoke user on worker | `user-worker` |
//! | clear host sessions | `allusers-protectedhost` |
//! | nuclear worker clear | `allusers-worker` |
//! | admin force refresh | `host` |
//! | config refresh | `config` |

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::errors::ApiError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::domain::cache_scope::CacheClearScope;
use crate::domain::entities::{Host, Session, User, Worker};
use crate::domain::events::{AuditEvent, AuditEventType, Severity};
use crate::repository::session_repository::NewSession;
use crate::repository::{
    ApiKeyRepository, AuditRepository, HostRepository, SessionRepository, UserRepository,
    WorkerRepository,
};
use crate::service::worker_client::{CacheInvalidator, FORCE_REFRESH_TIMEOUT, WORKER_RPC_TIMEOUT};

/// Default duration of a worker-reported normal session: 8 hours.
pub const DEFAULT_SESSION_DURATION_S: i64 = 28_800;

// =============================================================================
// PARAMETER & RESULT TYPES
// =============================================================================

/// Worker-reported fields for a normal session.
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub username: String,
    pub host_domain: Option<String>,
    pub session_id: String,
    pub credential_id: Option<String>,
    pub created_ip: Option<String>,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub csrf_token: Option<String>,
    pub duration_s: Option<i64>,
}

/// Worker-reported fields for a remote session (paid path). The worker has
/// already verified the WebAuthn credential; the control plane trusts the
/// provided user id.
#[derive(Debug, Clone)]
pub struct CreateRemoteSessionParams {
    pub worker_name: String,
    pub host_id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub session_duration: Option<i64>,
    pub device_info: serde_json::Value,
}

/// Result of a revocation flow: what committed locally, what the fan-out did.
#[derive(Debug, Clone)]
pub struct RevocationSummary {
    /// Sessions revoked in the store (already durable)
    pub revoked_count: usize,
    /// Whether the worker acknowledged the cache clear
    pub cache_cleared: bool,
}

/// One row of the session-management listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub session_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub device_info: SessionDeviceInfo,
    pub protected_host: String,
}

/// Humanized device info for the listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionDeviceInfo {
    pub user_agent: String,
    pub ip_address: String,
    pub platform: String,
}

// =============================================================================
// USER-AGENT SUMMARIZATION
// =============================================================================

/// Summarizes a raw User-Agent into "Browser N on Platform" for the
/// session-management UI. Best effort; unknown strings stay unknown.
pub fn summarize_user_agent(ua: &str) -> String {
    if ua.is_empty() {
        return "Unknown Browser".to_string();
    }
    let browser = if ua.contains("Chrome") {
        match ua.split("Chrome/").nth(1).and_then(|v| v.split('.').next()) {
            Some(version) => format!("Chrome {version}"),
            None => "Chrome".to_string(),
        }
    } else if ua.contains("Firefox") {
        match ua.split("Firefox/").nth(1).and_then(|v| v.split('.').next()) {
            Some(version) => format!("Firefox {version}"),
            None => "Firefox".to_string(),
        }
    } else if ua.contains("Safari") {
        "Safari".to_string()
    } else {
        "Unknown Browser".to_string()
    };
    format!("{browser} on {}", extract_platform(ua))
}

/// Extracts the OS/platform from a User-Agent string.
pub fn extract_platform(ua: &str) -> &'static str {
    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") {
        "macOS"
    } else if ua.contains("iPhone") {
        "iOS"
    } else if ua.contains("iPad") {
        "iPadOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

// =============================================================================
// SESSION SERVICE
// =============================================================================

/// Business logic for sessions and the revocation fan-out.
#[derive(Clone)]
pub struct SessionService {
    sessions: SessionRepository,
    users: UserRepository,
    hosts: HostRepository,
    workers: WorkerRepository,
    api_keys: ApiKeyRepository,
    audit: AuditRepository,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl SessionService {
    pub fn new(
        sessions: SessionRepository,
        users: UserRepository,
        hosts: HostRepository,
        workers: WorkerRepository,
        api_keys: ApiKeyRepository,
        audit: AuditRepository,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self { sessions, users, hosts, workers, api_keys, audit, invalidator }
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Records a worker-reported normal session.
    #[instrument(skip(self, params), fields(session_id = %params.session_id))]
    pub async fn create_session(&self, params: CreateSessionParams) -> Result<Session, ApiError> {
        let user = self
            .users
            .find_active_by_username(&params.username)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{}", params.username) })?;

        let host = match &params.host_domain {
            Some(domain) => self.hosts.find_by_domain(domain).await?,
            None => None,
        };

        let duration = params.duration_s.unwrap_or(DEFAULT_SESSION_DURATION_S);
        let expires_at = Utc::now() + ChronoDuration::seconds(duration);

        let session = self
            .sessions
            .create(NewSession {
                session_id: params.session_id.clone(),
                user_id: user.id,
                host_id: host.as_ref().map(|h| h.id),
                session_type: "normal".to_string(),
                credential_id: params.credential_id,
                expires_at,
                created_ip: params.created_ip.clone(),
                device_fingerprint: params.device_fingerprint,
                user_agent: params.user_agent,
                csrf_token: params.csrf_token,
                created_via: None,
            })
            .await?;

        self.audit
            .append(
                AuditEvent::new(AuditEventType::SessionCreated)
                    .user(user.id, &user.username)
                    .ip(params.created_ip)
                    .details(serde_json::json!({ "session_id": session.session_id })),
            )
            .await?;

        Ok(session)
    }

    /// Records a remote session after local WebAuthn verification at the
    /// edge. Validates the host's remote-auth configuration and the
    /// requested duration against the host maximum.
    #[instrument(skip(self, params), fields(worker = %params.worker_name))]
    pub async fn create_remote_session(
        &self,
        params: CreateRemoteSessionParams,
    ) -> Result<Session, ApiError> {
        let host = self
            .hosts
            .find_by_id(params.host_id)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{}", params.host_id) })?;

        if !host.remote_auth_enabled {
            return Err(ApiError::BadRequest {
                message: "Remote authentication not enabled for this host".to_string(),
            });
        }

        let requested = params.session_duration.unwrap_or(i64::from(host.remote_auth_session_ttl));
        let max = i64::from(host.remote_auth_max_session_ttl);
        if requested > max {
            return Err(ApiError::BadRequest {
                message: format!("Session duration cannot exceed {max} seconds"),
            });
        }

        let user = self
            .users
            .find_by_id(params.user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{}", params.user_id) })?;

        let session_id = format!("sess_{}", uuid::Uuid::new_v4().simple());
        let expires_at = Utc::now() + ChronoDuration::seconds(requested);
        let device_ip = params.device_info["ip_address"].as_str().map(String::from);
        let device_ua = params.device_info["user_agent"].as_str().map(String::from);

        let session = self
            .sessions
            .create(NewSession {
                session_id,
                user_id: user.id,
                host_id: Some(host.id),
                session_type: "remote".to_string(),
                credential_id: None,
                expires_at,
                created_ip: device_ip.clone(),
                device_fingerprint: None,
                user_agent: device_ua.clone(),
                csrf_token: None,
                created_via: Some(params.device_info.to_string()),
            })
            .await?;

        self.audit
            .append(
                AuditEvent::new(AuditEventType::RemoteAuthSessionCreated)
                    .user(user.id, &user.username)
                    .worker(&params.worker_name)
                    .ip(device_ip)
                    .user_agent(device_ua)
                    .source("remote_auth")
                    .details(serde_json::json!({
                        "session_id": session.session_id,
                        "worker_id": params.worker_name,
                        "session_duration": requested,
                        "device_info": params.device_info,
                        "host_domain": host.domain,
                    })),
            )
            .await?;

        Ok(session)
    }

    // =========================================================================
    // SESSION MANAGEMENT (worker-proxied)
    // =========================================================================

    /// Lists a user's unexpired sessions for the session-management UI.
    pub async fn list_user_sessions(
        &self,
        user_id: uuid::Uuid,
        worker_name: Option<String>,
    ) -> Result<Vec<SessionInfo>, ApiError> {
        let sessions = self.sessions.list_unexpired_for_user(user_id).await?;

        let mut infos = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let protected_host = match session.host_id {
                Some(host_id) => self
                    .hosts
                    .find_by_id(host_id)
                    .await?
                    .map(|h| h.domain)
                    .unwrap_or_else(|| "Unknown".to_string()),
                None => "Unknown".to_string(),
            };

            let device = session.device_info();
            let raw_ua = device["user_agent"]
                .as_str()
                .map(String::from)
                .or_else(|| session.user_agent.clone())
                .unwrap_or_default();
            let ip = device["ip_address"]
                .as_str()
                .map(String::from)
                .or_else(|| session.created_ip.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            infos.push(SessionInfo {
                session_id: session.session_id.clone(),
                session_type: session.session_type.clone(),
                created_at: session.created_at,
                expires_at: session.expires_at,
                last_activity: session.last_activity,
                device_info: SessionDeviceInfo {
                    user_agent: summarize_user_agent(&raw_ua),
                    ip_address: ip,
                    platform: extract_platform(&raw_ua).to_string(),
                },
                protected_host,
            });
        }

        if !infos.is_empty() {
            let mut audit = AuditEvent::new(AuditEventType::RemoteAuthSessionListed)
                .source("remote_auth")
                .details(serde_json::json!({
                    "user_id": user_id,
                    "session_count": infos.len(),
                }));
            if let Some(name) = &worker_name {
                audit = audit.worker(name);
            }
            self.audit.append(audit).await?;
        }

        Ok(infos)
    }

    /// Terminates one session on behalf of its owner. The worker validated
    /// the user's management JWT and vouches for `requesting_user_id`;
    /// terminating another user's session is a 403.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn terminate_session(
        &self,
        session_id: &str,
        requesting_user_id: uuid::Uuid,
        worker_name: Option<String>,
    ) -> Result<(), ApiError> {
        let session = self
            .sessions
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("session:{session_id}") })?;

        if session.user_id != requesting_user_id {
            return Err(ApiError::AccessDenied);
        }

        let protected_host = match session.host_id {
            Some(host_id) => self
                .hosts
                .find_by_id(host_id)
                .await?
                .map(|h| h.domain)
                .unwrap_or_else(|| "Unknown".to_string()),
            None => "Unknown".to_string(),
        };
        let username = self
            .users
            .find_by_id(session.user_id)
            .await?
            .map(|u| u.username)
            .unwrap_or_default();

        self.sessions.delete_by_session_id(session_id).await?;

        let mut audit = AuditEvent::new(AuditEventType::RemoteAuthSessionTerminated)
            .source("remote_auth")
            .details(serde_json::json!({
                "session_id": session_id,
                "session_type": session.session_type,
                "protected_host": protected_host,
                "terminated_by": "user",
            }));
        audit = audit.user(session.user_id, &username);
        if let Some(name) = &worker_name {
            audit = audit.worker(name);
        }
        self.audit.append(audit).await?;

        Ok(())
    }

    // =========================================================================
    // REVOCATION FLOWS
    // =========================================================================

    /// Revokes one session, then clears it from the edge (`user-session`).
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn revoke_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<RevocationSummary, ApiError> {
        let session = self
            .sessions
            .revoke_by_session_id(session_id, reason)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("session:{session_id}") })?;

        self.audit
            .append(
                AuditEvent::new(AuditEventType::SessionRevoked)
                    .details(serde_json::json!({
                        "session_id": session_id,
                        "reason": reason,
                    })),
            )
            .await?;

        // Fan-out needs the host binding; a host-less session is only local
        let (Some(host_id), Some(user)) =
            (session.host_id, self.users.find_by_id(session.user_id).await?)
        else {
            return Ok(RevocationSummary { revoked_count: 1, cache_cleared: false });
        };
        let Some(host) = self.hosts.find_by_id(host_id).await? else {
            return Ok(RevocationSummary { revoked_count: 1, cache_cleared: false });
        };

        let scope = CacheClearScope::UserSession {
            hostname: host.domain.clone(),
            username: user.username.clone(),
            session_id: session_id.to_string(),
        };
        let cleared = self
            .fan_out(&host, &scope, &format!("Session revocation: {reason}"), false)
            .await?;

        Ok(RevocationSummary { revoked_count: 1, cache_cleared: cleared })
    }

    /// Revokes all of a user's sessions on one host (`user-protectedhost`).
    pub async fn revoke_user_sessions_on_host(
        &self,
        username: &str,
        host_domain: &str,
        reason: &str,
    ) -> Result<RevocationSummary, ApiError> {
        let (user, host) = self.resolve_user_and_host(username, host_domain).await?;

        let revoked = self
            .sessions
            .revoke_for_user_on_host(user.id, host.id, reason)
            .await?;
        self.audit_bulk_revocation(&revoked, reason, Some(&user)).await?;

        let scope = CacheClearScope::UserProtectedHost {
            username: user.username.clone(),
            hostname: host.domain.clone(),
        };
        let cleared = self.fan_out(&host, &scope, reason, false).await?;

        Ok(RevocationSummary { revoked_count: revoked.len(), cache_cleared: cleared })
    }

    /// Revokes all of a user's sessions across one worker (`user-worker`).
    pub async fn revoke_user_sessions_on_worker(
        &self,
        username: &str,
        worker_name: &str,
        reason: &str,
    ) -> Result<RevocationSummary, ApiError> {
        let user = self
            .users
            .find_active_by_username(username)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{username}") })?;
        let worker = self.resolve_worker(worker_name).await?;

        let revoked = self
            .sessions
            .revoke_for_user_on_worker(user.id, worker.id, reason)
            .await?;
        self.audit_bulk_revocation(&revoked, reason, Some(&user)).await?;

        let scope = CacheClearScope::UserWorker { username: user.username.clone() };
        let cleared = self.fan_out_via_worker(&worker, &scope, reason, false).await?;

        Ok(RevocationSummary { revoked_count: revoked.len(), cache_cleared: cleared })
    }

    /// Revokes every session on one host (`allusers-protectedhost`).
    pub async fn clear_host_sessions(
        &self,
        host_domain: &str,
        reason: &str,
    ) -> Result<RevocationSummary, ApiError> {
        let host = self
            .hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        // Pre-flight before mutating: a host without a worker cannot be
        // cleared and the admin asked for an explicit host-wide action
        self.preflight(&host).await?;

        let revoked = self.sessions.revoke_all_on_host(host.id, reason).await?;
        self.audit_bulk_revocation(&revoked, reason, None).await?;

        let scope = CacheClearScope::AllUsersProtectedHost { hostname: host.domain.clone() };
        let cleared = self.fan_out(&host, &scope, reason, false).await?;

        Ok(RevocationSummary { revoked_count: revoked.len(), cache_cleared: cleared })
    }

    /// Nuclear: revokes every session across one worker (`allusers-worker`).
    /// The revocation reason carries the NUCLEAR marker and the clear is
    /// audited at critical severity.
    #[instrument(skip(self), fields(worker = %worker_name))]
    pub async fn nuclear_clear_worker(
        &self,
        worker_name: &str,
        reason: &str,
    ) -> Result<RevocationSummary, ApiError> {
        let worker = self.resolve_worker(worker_name).await?;
        let nuclear_reason = format!("NUCLEAR: {reason}");

        let revoked = self
            .sessions
            .revoke_all_on_worker(worker.id, &nuclear_reason)
            .await?;
        self.audit_bulk_revocation(&revoked, &nuclear_reason, None).await?;

        let cleared = self
            .fan_out_via_worker(&worker, &CacheClearScope::AllUsersWorker, &nuclear_reason, false)
            .await?;

        warn!(worker = %worker.name, count = revoked.len(), "Nuclear session clear executed");
        Ok(RevocationSummary { revoked_count: revoked.len(), cache_cleared: cleared })
    }

    // =========================================================================
    // ADMIN REFRESH FLOWS (failures surfaced)
    // =========================================================================

    /// Immediate host-cache refresh (`host` scope, short timeout). Unlike
    /// revocation flows, a worker failure here is surfaced to the admin.
    pub async fn force_refresh_host(&self, host_domain: &str, reason: &str) -> Result<(), ApiError> {
        let host = self
            .hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        let scope = CacheClearScope::Host { hostname: host.domain.clone() };
        self.fan_out_with_timeout(&host, &scope, reason, true, FORCE_REFRESH_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Clears every configuration cache on a worker (`config` scope).
    pub async fn refresh_worker_config(
        &self,
        worker_name: &str,
        reason: &str,
    ) -> Result<(), ApiError> {
        let worker = self.resolve_worker(worker_name).await?;
        self.fan_out_via_worker(&worker, &CacheClearScope::Config, reason, true)
            .await?;
        Ok(())
    }

    // =========================================================================
    // EXPIRY SWEEP
    // =========================================================================

    /// Cron entry point: deactivates sessions whose expiry has passed and
    /// records one summary event.
    pub async fn sweep_expired(&self) -> Result<u64, ApiError> {
        let count = self.sessions.expire_stale().await?;
        if count > 0 {
            self.audit
                .append(
                    AuditEvent::new(AuditEventType::SessionExpired)
                        .source("system")
                        .details(serde_json::json!({ "count": count })),
                )
                .await?;
        }
        Ok(count)
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn resolve_user_and_host(
        &self,
        username: &str,
        host_domain: &str,
    ) -> Result<(User, Host), ApiError> {
        let user = self
            .users
            .find_active_by_username(username)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{username}") })?;
        let host = self
            .hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;
        Ok((user, host))
    }

    async fn resolve_worker(&self, worker_name: &str) -> Result<Worker, ApiError> {
        self.workers
            .find_by_name(worker_name)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("worker:{worker_name}") })
    }

    async fn audit_bulk_revocation(
        &self,
        revoked: &[Session],
        reason: &str,
        user: Option<&User>,
    ) -> Result<(), ApiError> {
        if revoked.is_empty() {
            return Ok(());
        }
        let mut audit = AuditEvent::new(AuditEventType::SessionBulkRevocation).details(
            serde_json::json!({
                "count": revoked.len(),
                "reason": reason,
                "session_ids": revoked.iter().map(|s| s.session_id.clone()).collect::<Vec<_>>(),
            }),
        );
        if let Some(user) = user {
            audit = audit.user(user.id, &user.username);
        }
        self.audit.append(audit).await
    }

    /// Pre-flight checks shared by every fan-out: the host must be bound to
    /// a worker and that worker must hold an active API key.
    async fn preflight(&self, host: &Host) -> Result<(Worker, String), ApiError> {
        let worker_id = host.worker_id.ok_or_else(|| ApiError::Conflict {
            resource: format!("Host {} is not yet bound to a worker", host.domain),
        })?;
        let worker = self
            .workers
            .find_by_id(worker_id)
            .await?
            .ok_or_else(|| ApiError::Conflict {
                resource: format!("Host {} references a missing worker", host.domain),
            })?;
        let api_key = self
            .api_keys
            .find_active_for_worker(worker.id)
            .await?
            .ok_or_else(|| ApiError::Conflict {
                resource: "No active API key found for Worker communication".to_string(),
            })?;
        Ok((worker, api_key.key))
    }

    async fn fan_out(
        &self,
        host: &Host,
        scope: &CacheClearScope,
        reason: &str,
        surface_failure: bool,
    ) -> Result<bool, ApiError> {
        self.fan_out_with_timeout(host, scope, reason, surface_failure, WORKER_RPC_TIMEOUT)
            .await
    }

    /// Fan-out addressed through a worker: picks any host currently bound
    /// to it as the delivery address (worker-wide scopes reach every host).
    async fn fan_out_via_worker(
        &self,
        worker: &Worker,
        scope: &CacheClearScope,
        reason: &str,
        surface_failure: bool,
    ) -> Result<bool, ApiError> {
        let hosts = self.hosts.hosts_for_worker(worker.id).await?;
        let Some(host) = hosts.into_iter().next() else {
            return Err(ApiError::Conflict {
                resource: format!("Worker {} has no bound hosts to deliver through", worker.name),
            });
        };
        self.fan_out_with_timeout(&host, scope, reason, surface_failure, WORKER_RPC_TIMEOUT)
            .await
    }

    /// One outbound cache-clear with audit capture.
    ///
    /// Returns `Ok(true)` on acknowledgment, `Ok(false)` for a degraded
    /// (audited, swallowed) failure, `Err` when `surface_failure` is set.
    async fn fan_out_with_timeout(
        &self,
        host: &Host,
        scope: &CacheClearScope,
        reason: &str,
        surface_failure: bool,
        timeout: Duration,
    ) -> Result<bool, ApiError> {
        let (worker, api_key) = self.preflight(host).await?;

        match self
            .invalidator
            .clear_cache(&host.domain, &api_key, scope, reason, timeout)
            .await
        {
            Ok(()) => {
                let (event, severity) = scope.success_event();
                self.audit
                    .append(
                        AuditEvent::new(event)
                            .severity(severity)
                            .worker(&worker.name)
                            .details(serde_json::json!({
                                "scope": scope.name(),
                                "target": scope.target(),
                                "host": host.domain,
                                "reason": reason,
                            })),
                    )
                    .await?;
                info!(host = %host.domain, scope = scope.name(), "Cache clear delivered");
                Ok(true)
            }
            Err(e) => {
                let severity = if surface_failure { Severity::Error } else { Severity::Warning };
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::CacheClearFailed)
                            .severity(severity)
                            .worker(&worker.name)
                            .details(serde_json::json!({
                                "scope": scope.name(),
                                "target": scope.target(),
                                "host": host.domain,
                                "reason": reason,
                                "error": e.to_string(),
                            })),
                    )
                    .await?;

                if surface_failure {
                    Err(ApiError::UpstreamUnavailable { message: e.to_string() })
                } else {
                    // Graceful degradation: the local revocation already
                    // committed; edges converge via their next snapshot pull
                    warn!(host = %host.domain, error = %e, "Cache clear failed, continuing");
                    Ok(false)
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_chrome_on_windows() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0.0.0 Safari/537.36";
        assert_eq!(summarize_user_agent(ua), "Chrome 120 on Windows");
    }

    #[test]
    fn test_summarize_firefox_on_linux() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
        assert_eq!(summarize_user_agent(ua), "Firefox 121 on Linux");
    }

    #[test]
    fn test_summarize_safari_is_not_chrome() {
        // Chrome UAs contain "Safari"; the reverse must not match
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 Version/17.0 Safari/605.1.15";
        assert_eq!(summarize_user_agent(ua), "Safari on macOS");
    }

    #[test]
    fn test_summarize_empty_ua() {
        assert_eq!(summarize_user_agent(""), "Unknown Browser");
    }

    #[test]
    fn test_platform_extraction() {
        assert_eq!(extract_platform("… iPhone …"), "iOS");
        assert_eq!(extract_platform("… iPad …"), "iPadOS");
        assert_eq!(extract_platform("… Android …"), "Android");
        assert_eq!(extract_platform("mystery"), "Unknown");
    }

    #[test]
    fn test_default_session_duration_is_8_hours() {
        assert_eq!(DEFAULT_SESSION_DURATION_S, 8 * 3600);
    }
}
