//! Service layer: the business logic between the REST surface and the
//! repositories.
//!
//! Services own orchestration (lookups, invariant checks, audit events,
//! fan-out) while repositories own transactions and SQL. The two outbound
//! dependencies - the worker RPC client and the mail transport - are
//! behind traits so every flow is testable without the network.

pub mod api_key_service;
pub mod config_service;
pub mod host_service;
pub mod mailer;
pub mod otp_service;
pub mod session_service;
pub mod token_service;
pub mod worker_client;
pub mod worker_service;

pub use api_key_service::ApiKeyService;
pub use config_service::ConfigService;
pub use host_service::HostService;
pub use otp_service::OtpService;
pub use session_service::SessionService;
pub use token_service::TokenService;
pub use worker_service::WorkerService;
