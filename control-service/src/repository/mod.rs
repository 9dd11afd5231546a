//! Repository layer: all PostgreSQL access.
//!
//! Conventions:
//!
//! - Runtime-bound queries (`sqlx::query_as::<_, T>` + `.bind`), `FromRow`
//!   entities, explicit column lists shared per table.
//! - Write paths that must be atomic (`consume token`, `record OTP attempt`,
//!   `migrate host`) begin and commit exactly one transaction inside the
//!   repository method, take `SELECT … FOR UPDATE` row locks, and append
//!   their audit events within the same transaction.
//! - `updated_at`/`config_version` are bumped by a database trigger, so no
//!   UPDATE statement mentions them.
//! - Audit rows are append-only: the only DELETE lives in
//!   [`AuditRepository::prune_older_than`], called by the retention cron.

pub mod api_key_repository;
pub mod audit_repository;
pub mod host_repository;
pub mod passkey_repository;
pub mod session_repository;
pub mod settings_repository;
pub mod token_repository;
pub mod user_repository;
pub mod webhook_repository;
pub mod worker_repository;

pub use api_key_repository::ApiKeyRepository;
pub use audit_repository::AuditRepository;
pub use host_repository::HostRepository;
pub use passkey_repository::PasskeyRepository;
pub use session_repository::SessionRepository;
pub use settings_repository::SettingsRepository;
pub use token_repository::TokenRepository;
pub use user_repository::UserRepository;
pub use webhook_repository::WebhookRepository;
pub use worker_repository::WorkerRepository;
