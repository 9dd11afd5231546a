//! # Sunray Control Plane - Shared Library
//!
//! Cross-cutting functionality for the Sunray control-plane services.
//!
//! The control plane is the source of truth of a zero-trust access platform:
//! edge workers front customer domains and enforce authentication, while the
//! services in this workspace store users, credentials, sessions and per-host
//! policy. This crate holds the pieces every service needs and that are not
//! specific to any one entity.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`AppConfig`] |
//! | [`errors`] | Standardized error handling | [`ApiError`], [`ApiResult`] |
//! | [`database`] | PostgreSQL connection pool | [`create_pool`](database::create_pool) |
//! | [`tracing_config`] | Structured logging setup | [`init_tracing`](tracing_config::init_tracing) |
//! | [`validation`] | Request validation helpers | Custom validators |
//!
//! ## Design Decisions
//!
//! 1. **Single source of truth**: shared types live here to prevent drift
//! 2. **Transactional by default**: no process-local caches; every read that
//!    matters goes through the database
//! 3. **Security first**: secrets are hashed before storage, never logged
//! 4. **Observable by default**: structured logging and tracing built-in
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::{AppConfig, ApiError, ApiResult};
//! use shared::database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let db_pool = database::create_pool(&config.database).await?;
//!
//!     // Ready to build your service!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod errors;
pub mod tracing_config;
pub mod validation;

// Re-exports for convenience - import commonly used types directly from `shared`
pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
