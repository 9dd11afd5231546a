//! # Worker Registration & Migration
//!
//! The worker lifecycle: idempotent re-registration, initial binding of
//! unbound hosts, and the admin-scheduled migration between two worker
//! identities.
//!
//! Migration is a two-step handshake: an admin schedules
//! `pending_worker_name` on the host (a plain string - the target worker
//! may not exist yet), and the swap happens atomically when a worker with
//! that exact name registers for the hostname. See
//! [`crate::domain::registration`] for the decision table.

use shared::errors::ApiError;
use tracing::{info, instrument, warn};

use crate::domain::entities::{ApiKey, Host, Worker};
use crate::domain::events::{AuditEvent, AuditEventType, Severity};
use crate::domain::registration::{decide_registration, RegistrationOutcome};
use crate::repository::worker_repository::PendingMigration;
use crate::repository::{AuditRepository, HostRepository, WorkerRepository};

/// Worker type recorded for self-registered workers.
const DEFAULT_WORKER_TYPE: &str = "cloudflare";

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Successful registration result.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub outcome: RegistrationOutcome,
    pub host: Host,
    pub worker: Worker,
}

/// Observability projection of one worker's migration situation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub worker_name: String,
    pub protected_hosts: i64,
    /// Hosts this worker binds that are scheduled to leave
    pub pending_outbound: Vec<MigrationEdge>,
    /// Hosts on other workers scheduled to arrive here
    pub pending_inbound: Vec<MigrationEdge>,
}

/// One host in a pending migration, with the worker on the other end.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationEdge {
    pub host: String,
    pub pending_worker: String,
}

impl From<PendingMigration> for MigrationEdge {
    fn from(p: PendingMigration) -> Self {
        Self { host: p.host, pending_worker: p.worker }
    }
}

// =============================================================================
// WORKER SERVICE
// =============================================================================

/// Business logic for worker registration and migration.
#[derive(Clone)]
pub struct WorkerService {
    workers: WorkerRepository,
    hosts: HostRepository,
    audit: AuditRepository,
}

impl WorkerService {
    pub fn new(workers: WorkerRepository, hosts: HostRepository, audit: AuditRepository) -> Self {
        Self { workers, hosts, audit }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Registers `worker_name` for `hostname`.
    ///
    /// Unknown worker names are created on the fly, bound to the API key
    /// the caller authenticated with (workers self-register on first
    /// contact). The outcome then follows the decision table; a conflict is
    /// rejected with 409 and audited.
    #[instrument(skip(self, api_key), fields(worker = %worker_name, hostname = %hostname))]
    pub async fn register(
        &self,
        worker_name: &str,
        hostname: &str,
        worker_url: Option<&str>,
        api_key: &ApiKey,
        client_ip: Option<String>,
    ) -> Result<RegistrationResult, ApiError> {
        if worker_name.trim().is_empty() {
            return Err(ApiError::BadRequest {
                message: "X-Worker-ID header is required".to_string(),
            });
        }

        let host = self
            .hosts
            .find_active_by_domain(hostname)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{hostname}") })?;

        let worker = match self.workers.find_by_name(worker_name).await? {
            Some(worker) => worker,
            None => {
                info!(worker = %worker_name, "Self-registering new worker identity");
                self.workers
                    .create(worker_name, DEFAULT_WORKER_TYPE, worker_url, api_key.id)
                    .await?
            }
        };

        let current_worker_name = match host.worker_id {
            Some(worker_id) => self.workers.find_by_id(worker_id).await?.map(|w| w.name),
            None => None,
        };

        let outcome = decide_registration(
            current_worker_name.as_deref(),
            host.pending_worker_name.as_deref(),
            &worker.name,
        );

        let host = match outcome {
            RegistrationOutcome::ReRegistered => {
                // Idempotent: no state change, but the heartbeat is recorded
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::WorkerReRegistered)
                            .worker(&worker.name)
                            .api_key(api_key.id)
                            .ip(client_ip)
                            .details(serde_json::json!({ "hostname": hostname })),
                    )
                    .await?;
                host
            }
            RegistrationOutcome::InitialBind => {
                let audit = AuditEvent::new(AuditEventType::WorkerRegistered)
                    .worker(&worker.name)
                    .api_key(api_key.id)
                    .ip(client_ip)
                    .details(serde_json::json!({ "hostname": hostname }));
                self.hosts.bind_worker(&host, &worker, audit).await?
            }
            RegistrationOutcome::Migrated => {
                let audit = AuditEvent::new(AuditEventType::WorkerMigrated)
                    .worker(&worker.name)
                    .api_key(api_key.id)
                    .ip(client_ip)
                    .details(serde_json::json!({
                        "hostname": hostname,
                        "previous_worker": current_worker_name,
                    }));
                let migrated = self.hosts.migrate_to_worker(&host, &worker, audit).await?;
                info!(
                    hostname = %hostname,
                    from = current_worker_name.as_deref().unwrap_or("-"),
                    to = %worker.name,
                    "Worker migration completed"
                );
                migrated
            }
            RegistrationOutcome::Conflict => {
                warn!(
                    hostname = %hostname,
                    requested = %worker.name,
                    bound = current_worker_name.as_deref().unwrap_or("-"),
                    "Rejected registration for a host bound to another worker"
                );
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::WorkerRegistrationConflict)
                            .severity(Severity::Warning)
                            .worker(&worker.name)
                            .api_key(api_key.id)
                            .ip(client_ip)
                            .details(serde_json::json!({
                                "hostname": hostname,
                                "bound_worker": current_worker_name,
                                "pending_worker": host.pending_worker_name,
                            })),
                    )
                    .await?;
                return Err(ApiError::Conflict {
                    resource: format!("Host {hostname} is bound to another worker"),
                });
            }
        };

        Ok(RegistrationResult { outcome, host, worker })
    }

    // =========================================================================
    // ADMIN MIGRATION SCHEDULING
    // =========================================================================

    /// Schedules a migration of `host_domain` to `worker_name`.
    ///
    /// Rejects empty names and double scheduling (the existing pending
    /// migration must be cleared first).
    #[instrument(skip(self), fields(host = %host_domain, worker = %worker_name))]
    pub async fn set_pending_worker(
        &self,
        host_domain: &str,
        worker_name: &str,
    ) -> Result<Host, ApiError> {
        if worker_name.trim().is_empty() {
            return Err(ApiError::BadRequest {
                message: "Worker name cannot be empty".to_string(),
            });
        }

        let host = self
            .hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        if host.pending_worker_name.is_some() {
            return Err(ApiError::Conflict {
                resource: "Migration already pending; clear it before scheduling another"
                    .to_string(),
            });
        }

        let audit = AuditEvent::new(AuditEventType::WorkerMigrationRequested)
            .worker(worker_name)
            .details(serde_json::json!({
                "hostname": host.domain,
                "pending_worker": worker_name,
            }));
        self.hosts.set_pending_worker(host.id, worker_name, audit).await
    }

    /// Cancels the pending migration of `host_domain`.
    #[instrument(skip(self), fields(host = %host_domain))]
    pub async fn clear_pending_worker(&self, host_domain: &str) -> Result<Host, ApiError> {
        let host = self
            .hosts
            .find_by_domain(host_domain)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("host:{host_domain}") })?;

        let Some(pending) = host.pending_worker_name.clone() else {
            return Err(ApiError::Conflict {
                resource: "No pending migration to clear".to_string(),
            });
        };

        let audit = AuditEvent::new(AuditEventType::WorkerMigrationCancelled)
            .worker(&pending)
            .details(serde_json::json!({
                "hostname": host.domain,
                "cancelled_worker": pending,
            }));
        self.hosts.clear_pending_worker(host.id, audit).await
    }

    // =========================================================================
    // OBSERVABILITY
    // =========================================================================

    /// Migration status projection for one worker.
    pub async fn migration_status(&self, worker_name: &str) -> Result<MigrationStatus, ApiError> {
        let worker = self
            .workers
            .find_by_name(worker_name)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("worker:{worker_name}") })?;

        let protected_hosts = self.workers.protected_host_count(worker.id).await?;
        let pending_outbound = self
            .workers
            .pending_outbound(worker.id)
            .await?
            .into_iter()
            .map(MigrationEdge::from)
            .collect();
        let pending_inbound = self
            .workers
            .pending_inbound(&worker.name)
            .await?
            .into_iter()
            .map(MigrationEdge::from)
            .collect();

        Ok(MigrationStatus {
            worker_name: worker.name,
            protected_hosts,
            pending_outbound,
            pending_inbound,
        })
    }
}
