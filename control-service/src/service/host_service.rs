//! # Host Service
//!
//! Host creation, user authorization, the timing-override validations, and
//! the host state machine (including the daily go-live transition job).

use chrono::Utc;
use shared::errors::ApiError;
use shared::validation::validators::valid_domain;
use tracing::{info, instrument};

use crate::domain::entities::{Host, User};
use crate::domain::events::{AuditEvent, AuditEventType};
use crate::domain::host_state::{derive_state, HostState};
use crate::repository::host_repository::TimingColumn;
use crate::repository::settings_repository::keys;
use crate::repository::{AuditRepository, HostRepository, SettingsRepository, UserRepository};

/// Lower bound of both timing overrides: one minute.
const MIN_TIMING_S: i32 = 60;

// =============================================================================
// HOST SERVICE
// =============================================================================

/// Business logic for protected hosts.
#[derive(Clone)]
pub struct HostService {
    hosts: HostRepository,
    users: UserRepository,
    settings: SettingsRepository,
    audit: AuditRepository,
}

impl HostService {
    pub fn new(
        hosts: HostRepository,
        users: UserRepository,
        settings: SettingsRepository,
        audit: AuditRepository,
    ) -> Self {
        Self { hosts, users, settings, audit }
    }

    // =========================================================================
    // CREATION & AUTHORIZATION
    // =========================================================================

    /// Creates a host with default policy.
    pub async fn create_host(&self, domain: &str, backend_url: &str) -> Result<Host, ApiError> {
        if valid_domain(domain).is_err() {
            return Err(ApiError::BadRequest {
                message: format!("Invalid domain name: {domain}"),
            });
        }
        self.hosts.create(domain, backend_url).await
    }

    /// Creates a user.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<User, ApiError> {
        if username.trim().is_empty() {
            return Err(ApiError::BadRequest { message: "Username cannot be empty".to_string() });
        }
        self.users.create(username, email, display_name).await
    }

    /// Adds a user to a host's authorized set, auditing first-time grants.
    #[instrument(skip(self), fields(username = %username, host = %host_domain))]
    pub async fn authorize_user(&self, host_domain: &str, username: &str) -> Result<bool, ApiError> {
        let host = self
            .hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;
        let user = self
            .users
            .find_active_by_username(username)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{username}") })?;

        let newly_authorized = self.users.authorize_on_host(user.id, host.id).await?;
        if newly_authorized {
            self.audit
                .append(
                    AuditEvent::new(AuditEventType::HostUserAuthorized)
                        .user(user.id, &user.username)
                        .details(serde_json::json!({
                            "username": user.username,
                            "email": user.email,
                            "host": host.domain,
                        })),
                )
                .await?;
        }
        Ok(newly_authorized)
    }

    // =========================================================================
    // TIMING OVERRIDES
    // =========================================================================

    /// Sets the session duration, validated against
    /// `sunray.max_session_duration_s`, auditing the change with old and
    /// new values.
    pub async fn update_session_duration(
        &self,
        host_domain: &str,
        seconds: i32,
    ) -> Result<Host, ApiError> {
        let max = self
            .settings
            .get_i64(keys::MAX_SESSION_DURATION_S, keys::DEFAULT_MAX_SESSION_DURATION_S)
            .await?;
        self.check_timing_bounds(seconds, max, "Session duration")?;

        let host = self.require_host(host_domain).await?;
        let audit = AuditEvent::new(AuditEventType::SessionDurationChanged).details(
            serde_json::json!({
                "host": host.domain,
                "old_value": host.session_duration_s,
                "new_value": seconds,
            }),
        );
        self.hosts
            .update_timing(host.id, TimingColumn::SessionDuration, seconds, audit)
            .await
    }

    /// Sets the WAF-bypass revalidation period, validated against
    /// `sunray.max_waf_bypass_revalidation_s`.
    pub async fn update_waf_revalidation(
        &self,
        host_domain: &str,
        seconds: i32,
    ) -> Result<Host, ApiError> {
        let max = self
            .settings
            .get_i64(
                keys::MAX_WAF_BYPASS_REVALIDATION_S,
                keys::DEFAULT_MAX_WAF_BYPASS_REVALIDATION_S,
            )
            .await?;
        self.check_timing_bounds(seconds, max, "WAF bypass revalidation period")?;

        let host = self.require_host(host_domain).await?;
        let audit = AuditEvent::new(AuditEventType::WafRevalidationChanged).details(
            serde_json::json!({
                "host": host.domain,
                "old_value": host.waf_bypass_revalidation_s,
                "new_value": seconds,
            }),
        );
        self.hosts
            .update_timing(host.id, TimingColumn::WafBypassRevalidation, seconds, audit)
            .await
    }

    fn check_timing_bounds(&self, seconds: i32, max: i64, what: &str) -> Result<(), ApiError> {
        if seconds < MIN_TIMING_S {
            return Err(ApiError::BadRequest {
                message: format!("{what} must be at least {MIN_TIMING_S} seconds (1 minute)"),
            });
        }
        if i64::from(seconds) > max {
            return Err(ApiError::BadRequest {
                message: format!("{what} cannot exceed {max} seconds"),
            });
        }
        Ok(())
    }

    // =========================================================================
    // STATE MACHINE
    // =========================================================================

    /// Recomputes and persists the host state. Returns the updated host
    /// along with whether the state changed.
    pub async fn recompute_state(&self, host: &Host) -> Result<(Host, bool), ApiError> {
        let new_state = derive_state(host.state_input(), Utc::now().date_naive());
        if new_state.as_str() == host.state {
            return Ok((host.clone(), false));
        }
        let updated = self
            .hosts
            .update_state(host.id, new_state.as_str())
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{}", host.domain) })?;
        Ok((updated, true))
    }

    /// Daily cron: transitions deployment hosts whose go-live date has
    /// passed to protected, auditing each transition. Returns the number of
    /// hosts transitioned.
    #[instrument(skip(self))]
    pub async fn process_deployment_hosts(&self) -> Result<usize, ApiError> {
        let today = Utc::now().date_naive();
        let due = self.hosts.deployment_hosts_due(today).await?;
        let mut transitioned = 0;

        for host in due {
            let (updated, changed) = self.recompute_state(&host).await?;
            if changed && updated.state == HostState::Protected.as_str() {
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::HostGoliveTransition).details(
                            serde_json::json!({
                                "host": updated.domain,
                                "golive_date": host.golive_date.map(|d| d.to_string()),
                                "previous_state": "deployment",
                                "new_state": "protected",
                            }),
                        ),
                    )
                    .await?;
                info!(host = %updated.domain, "Go-live transition: deployment -> protected");
                transitioned += 1;
            }
        }

        Ok(transitioned)
    }

    async fn require_host(&self, host_domain: &str) -> Result<Host, ApiError> {
        self.hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })
    }
}
