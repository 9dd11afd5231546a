//! # Cache-Invalidation Scopes
//!
//! Every invalidation sent to a worker has the shape
//! `{scope, target, reason}`. There are exactly seven scopes; each one
//! requires a specific set of target fields:
//!
//! | scope | target fields | semantics |
//! |-------|---------------|-----------|
//! | `user-session` | hostname, username, sessionId | one cached session |
//! | `user-protectedhost` | username, hostname | all of a user's sessions on one host |
//! | `user-worker` | username | a user's sessions across a worker |
//! | `allusers-protectedhost` | hostname | every session on one host |
//! | `allusers-worker` | *(empty)* | every session across a worker (nuclear) |
//! | `host` | hostname | host configuration cache only |
//! | `config` | *(empty)* | all configuration caches on a worker |
//!
//! The enum carries the target data so an invalid combination (say, a
//! `user-session` without a session id) cannot be constructed.

use crate::domain::events::{AuditEventType, Severity};
use serde_json::{json, Value};

/// One of the seven invalidation scopes, with its target payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheClearScope {
    /// Revoke a single session cached at the edge.
    UserSession {
        hostname: String,
        username: String,
        session_id: String,
    },
    /// All sessions for one user on one host.
    UserProtectedHost { username: String, hostname: String },
    /// All sessions for one user across every host of one worker.
    UserWorker { username: String },
    /// Every session on one host.
    AllUsersProtectedHost { hostname: String },
    /// Every session across a worker. Nuclear; audited at critical severity.
    AllUsersWorker,
    /// Host configuration cache only.
    Host { hostname: String },
    /// All configuration caches on a worker.
    Config,
}

impl CacheClearScope {
    /// Wire name of the scope.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserSession { .. } => "user-session",
            Self::UserProtectedHost { .. } => "user-protectedhost",
            Self::UserWorker { .. } => "user-worker",
            Self::AllUsersProtectedHost { .. } => "allusers-protectedhost",
            Self::AllUsersWorker => "allusers-worker",
            Self::Host { .. } => "host",
            Self::Config => "config",
        }
    }

    /// The `target` object sent to the worker. Session ids travel as
    /// `sessionId` (worker-side naming).
    pub fn target(&self) -> Value {
        match self {
            Self::UserSession { hostname, username, session_id } => json!({
                "hostname": hostname,
                "username": username,
                "sessionId": session_id,
            }),
            Self::UserProtectedHost { username, hostname } => json!({
                "username": username,
                "hostname": hostname,
            }),
            Self::UserWorker { username } => json!({ "username": username }),
            Self::AllUsersProtectedHost { hostname } => json!({ "hostname": hostname }),
            Self::AllUsersWorker => json!({}),
            Self::Host { hostname } => json!({ "hostname": hostname }),
            Self::Config => json!({}),
        }
    }

    /// Full request body for `POST /sunray-wrkr/v1/cache/clear`.
    pub fn payload(&self, reason: &str) -> Value {
        json!({
            "scope": self.name(),
            "target": self.target(),
            "reason": reason,
        })
    }

    /// Whether this scope evicts every session on the worker.
    pub fn is_nuclear(&self) -> bool {
        matches!(self, Self::AllUsersWorker)
    }

    /// Audit event and severity recorded after a successful clear.
    pub fn success_event(&self) -> (AuditEventType, Severity) {
        if self.is_nuclear() {
            (AuditEventType::CacheNuclearClear, Severity::Critical)
        } else {
            (AuditEventType::CacheCleared, Severity::Info)
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
    fn test_user_session_payload_shape() {
        let scope = CacheClearScope::UserSession {
            hostname: "app1.example.com".into(),
            username: "alice".into(),
            session_id: "alice_app1_session".into(),
        };
        let payload = scope.payload("Session revocation: test");
        assert_eq!(payload["scope"], "user-session");
        assert_eq!(
            payload["target"],
            json!({
                "hostname": "app1.example.com",
                "username": "alice",
                "sessionId": "alice_app1_session",
            })
        );
        assert_eq!(payload["reason"], "Session revocation: test");
    }

    #[test]
    fn test_user_protectedhost_target() {
        let scope = CacheClearScope::UserProtectedHost {
            username: "alice".into(),
            hostname: "app1.example.com".into(),
        };
        assert_eq!(scope.name(), "user-protectedhost");
        assert_eq!(
            scope.target(),
            json!({ "username": "alice", "hostname": "app1.example.com" })
        );
    }

    #[test]
    fn test_user_worker_target() {
        let scope = CacheClearScope::UserWorker { username: "alice".into() };
        assert_eq!(scope.name(), "user-worker");
        assert_eq!(scope.target(), json!({ "username": "alice" }));
    }

    #[test]
    fn test_allusers_protectedhost_target() {
        let scope = CacheClearScope::AllUsersProtectedHost {
            hostname: "app1.example.com".into(),
        };
        assert_eq!(scope.name(), "allusers-protectedhost");
        assert_eq!(scope.target(), json!({ "hostname": "app1.example.com" }));
    }

    #[test]
    fn test_nuclear_scope_has_empty_target_and_critical_event() {
        let scope = CacheClearScope::AllUsersWorker;
        assert_eq!(scope.name(), "allusers-worker");
        assert_eq!(scope.target(), json!({}));
        assert!(scope.is_nuclear());

        let (event, severity) = scope.success_event();
        assert_eq!(event, AuditEventType::CacheNuclearClear);
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn test_host_and_config_scopes() {
        let host = CacheClearScope::Host { hostname: "app1.example.com".into() };
        assert_eq!(host.name(), "host");
        assert_eq!(host.target(), json!({ "hostname": "app1.example.com" }));

        let config = CacheClearScope::Config;
        assert_eq!(config.name(), "config");
        assert_eq!(config.target(), json!({}));
        assert!(!config.is_nuclear());
    }

    #[test]
    fn test_non_nuclear_success_event_is_info() {
        let scope = CacheClearScope::Config;
        let (event, severity) = scope.success_event();
        assert_eq!(event, AuditEventType::CacheCleared);
        assert_eq!(severity, Severity::Info);
    }
}
