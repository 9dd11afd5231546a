//! # Background Jobs
//!
//! Interval-driven housekeeping, spawned from `main` as detached tokio
//! tasks. Each tick is independent: a failing run logs and waits for the
//! next interval rather than killing the task.
//!
//! | Job | Interval | Effect |
//! |-----|----------|--------|
//! | Go-live transition | daily | deployment → protected for due hosts |
//! | OTP cleanup | hourly | prune OTPs expired/consumed > 24 h ago |
//! | Session expiry sweep | hourly | deactivate sessions past `expires_at` |
//! | Audit retention | daily | prune audit entries older than 90 days |

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::domain::events::{AuditEvent, AuditEventType};
use crate::repository::AuditRepository;
use crate::service::{HostService, OtpService, SessionService};

/// Audit entries older than this many days are pruned.
pub const AUDIT_RETENTION_DAYS: i64 = 90;

const DAILY: Duration = Duration::from_secs(24 * 60 * 60);
const HOURLY: Duration = Duration::from_secs(60 * 60);

/// Spawns all background jobs. Called once from `main` after the services
/// are wired; the tasks run for the lifetime of the process.
pub fn spawn_background_jobs(
    hosts: HostService,
    otps: OtpService,
    sessions: SessionService,
    audit: AuditRepository,
) {
    tokio::spawn(run_golive_job(hosts));
    tokio::spawn(run_otp_cleanup_job(otps));
    tokio::spawn(run_session_sweep_job(sessions));
    tokio::spawn(run_audit_retention_job(audit));
    info!("Background jobs spawned");
}

/// Daily: deployment → protected transitions for hosts whose go-live date
/// has arrived.
async fn run_golive_job(hosts: HostService) {
    let mut ticker = interval(DAILY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match hosts.process_deployment_hosts().await {
            Ok(0) => {}
            Ok(count) => info!(count = count, "Go-live transitions processed"),
            Err(e) => error!(error = %e, "Go-live transition job failed"),
        }
    }
}

/// Hourly: prune expired/consumed email OTPs.
async fn run_otp_cleanup_job(otps: OtpService) {
    let mut ticker = interval(HOURLY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = otps.cleanup_expired().await {
            error!(error = %e, "OTP cleanup job failed");
        }
    }
}

/// Hourly: deactivate sessions whose expiry passed.
async fn run_session_sweep_job(sessions: SessionService) {
    let mut ticker = interval(HOURLY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = sessions.sweep_expired().await {
            error!(error = %e, "Session expiry sweep failed");
        }
    }
}

/// Daily: prune audit entries older than [`AUDIT_RETENTION_DAYS`] and
/// record a summary. This is the only code path that deletes audit rows.
async fn run_audit_retention_job(audit: AuditRepository) {
    let mut ticker = interval(DAILY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match audit.prune_older_than(AUDIT_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(count) => {
                info!(count = count, "Audit retention pruned old entries");
                let summary = AuditEvent::new(AuditEventType::AuditRetention)
                    .source("system")
                    .details(serde_json::json!({
                        "count": count,
                        "retention_days": AUDIT_RETENTION_DAYS,
                    }));
                if let Err(e) = audit.append(summary).await {
                    error!(error = %e, "Failed to record retention summary");
                }
            }
            Err(e) => error!(error = %e, "Audit retention job failed"),
        }
    }
}
