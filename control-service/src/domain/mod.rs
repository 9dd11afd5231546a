//! Domain layer: persistent entities, the audit event taxonomy, and the
//! pure decision logic of the control plane (host state machine, worker
//! registration outcomes, cache-invalidation scopes).
//!
//! Everything here is free of I/O so the business rules can be tested
//! without a database or HTTP stack.

pub mod cache_scope;
pub mod entities;
pub mod events;
pub mod host_state;
pub mod otp;
pub mod registration;
pub mod token_codec;

pub use cache_scope::CacheClearScope;
pub use entities::*;
pub use events::{AuditEvent, AuditEventType, Severity};
pub use host_state::HostState;
pub use registration::RegistrationOutcome;
