//! # Worker RPC Client
//!
//! Outbound HTTP to edge workers. The single RPC is cache invalidation:
//!
//! ```text
//! POST https://<host_domain>/sunray-wrkr/v1/cache/clear
//! Authorization: Bearer <worker's ApiKey>
//! { "scope": …, "target": …, "reason": … }
//! ```
//!
//! Timeouts are contractual: 10 s per call, 5 s for the legacy force-refresh
//! path. Failures are captured by the caller into the audit log; whether
//! they are surfaced depends on the flow (admin refresh: yes, session
//! revocation: graceful degradation).
//!
//! The client is behind the [`CacheInvalidator`] trait so the session
//! service can be tested with a mock.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::cache_scope::CacheClearScope;

/// Default per-call timeout for worker RPCs.
pub const WORKER_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Shorter timeout for the legacy admin force-refresh flow.
pub const FORCE_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure of an outbound worker call.
#[derive(Debug, thiserror::Error)]
pub enum WorkerRpcError {
    /// The worker answered with a non-2xx status.
    #[error("worker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport-level failure (DNS, connect, timeout).
    #[error("worker request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

// =============================================================================
// TRAIT
// =============================================================================

/// Outbound cache invalidation against one worker, addressed through a
/// protected host domain it serves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Sends one `{scope, target, reason}` invalidation.
    async fn clear_cache(
        &self,
        host_domain: &str,
        api_key: &str,
        scope: &CacheClearScope,
        reason: &str,
        timeout: Duration,
    ) -> Result<(), WorkerRpcError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

/// reqwest-based invalidator used in production.
#[derive(Clone)]
pub struct WorkerRpcClient {
    http: reqwest::Client,
    /// `https` in production; tests override to reach a local mock server.
    scheme: String,
}

impl WorkerRpcClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: "https".to_string(),
        }
    }

    /// Test constructor: speak plain HTTP to a local server.
    pub fn with_scheme(scheme: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: scheme.to_string(),
        }
    }

    fn cache_clear_url(&self, host_domain: &str) -> String {
        format!("{}://{}/sunray-wrkr/v1/cache/clear", self.scheme, host_domain)
    }
}

impl Default for WorkerRpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheInvalidator for WorkerRpcClient {
    async fn clear_cache(
        &self,
        host_domain: &str,
        api_key: &str,
        scope: &CacheClearScope,
        reason: &str,
        timeout: Duration,
    ) -> Result<(), WorkerRpcError> {
        let url = self.cache_clear_url(host_domain);
        info!(url = %url, scope = scope.name(), "Calling worker cache clear");

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&scope.payload(reason))
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "Worker cache clear rejected");
            return Err(WorkerRpcError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(url = %url, scope = scope.name(), "Worker cache clear succeeded");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_clear_cache_posts_scope_payload_with_bearer() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sunray-wrkr/v1/cache/clear"))
            .and(header("Authorization", "Bearer test_key_123"))
            .and(body_partial_json(serde_json::json!({
                "scope": "user-session",
                "target": {
                    "hostname": "test.example.com",
                    "username": "testuser",
                    "sessionId": "test_session_123",
                },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "cleared": ["user-session"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = WorkerRpcClient::with_scheme("http");
        let scope = CacheClearScope::UserSession {
            hostname: "test.example.com".into(),
            username: "testuser".into(),
            session_id: "test_session_123".into(),
        };

        // The mock server plays the role of the worker; its address stands
        // in for the protected host domain.
        let domain = server.address().to_string();
        let result = client
            .clear_cache(&domain, "test_key_123", &scope, "Session revocation: test", WORKER_RPC_TIMEOUT)
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clear_cache_maps_non_2xx_to_status_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sunray-wrkr/v1/cache/clear"))
            .respond_with(ResponseTemplate::new(503).set_body_string("worker overloaded"))
            .mount(&server)
            .await;

        let client = WorkerRpcClient::with_scheme("http");
        let domain = server.address().to_string();
        let result = client
            .clear_cache(&domain, "k", &CacheClearScope::Config, "refresh", WORKER_RPC_TIMEOUT)
            .await;

        match result {
            Err(WorkerRpcError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "worker overloaded");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clear_cache_transport_error_on_unreachable_worker() {
        let client = WorkerRpcClient::with_scheme("http");
        // Reserved TEST-NET address; nothing listens there
        let result = client
            .clear_cache(
                "127.0.0.1:9",
                "k",
                &CacheClearScope::Config,
                "refresh",
                Duration::from_millis(500),
            )
            .await;

        assert!(matches!(result, Err(WorkerRpcError::Transport(_))));
    }

    #[test]
    fn test_url_shape() {
        let client = WorkerRpcClient::new();
        assert_eq!(
            client.cache_clear_url("app.example.com"),
            "https://app.example.com/sunray-wrkr/v1/cache/clear"
        );
    }
}
