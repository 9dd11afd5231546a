//! # Mail Transport
//!
//! Email delivery is out of band: the control plane hands a message to an
//! external transport with at-least-once semantics and records the request
//! (not the delivery) in the audit log.
//!
//! The transport is a trait so token delivery can be tested without a
//! relay, and so deployments without email simply wire the disabled
//! implementation (token values are then only shown on screen).

use async_trait::async_trait;
use serde::Serialize;
use shared::config::MailConfig;
use tracing::info;

/// A templated message handed to the relay.
#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    /// Template identifier, chosen via `sunray.setup_token_mail_template`
    pub template: String,
    /// Template variables (token value, host domain, expiry, …)
    pub variables: serde_json::Value,
}

/// Failure to hand a message to the transport.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay is not configured")]
    NotConfigured,

    #[error("mail relay returned HTTP {status}")]
    Status { status: u16 },

    #[error("mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

// =============================================================================
// TRAIT
// =============================================================================

/// Asynchronous mail hand-off.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

// =============================================================================
// HTTP RELAY IMPLEMENTATION
// =============================================================================

/// Posts messages as JSON to the configured relay endpoint.
pub struct HttpMailTransport {
    http: reqwest::Client,
    relay_url: Option<String>,
    from_address: String,
}

impl HttpMailTransport {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            relay_url: config.relay_url.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let relay_url = self.relay_url.as_deref().ok_or(MailError::NotConfigured)?;

        let body = serde_json::json!({
            "from": self.from_address,
            "to": message.to,
            "subject": message.subject,
            "template": message.template,
            "variables": message.variables,
        });

        let response = self.http.post(relay_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Status { status: status.as_u16() });
        }

        info!(to = %message.to, template = %message.template, "Mail handed to relay");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> MailMessage {
        MailMessage {
            to: "alice@ex.com".into(),
            subject: "Your setup token".into(),
            template: "setup_token_v2".into(),
            variables: serde_json::json!({ "host": "app.ex.com" }),
        }
    }

    #[tokio::test]
    async fn test_send_posts_message_to_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "to": "alice@ex.com",
                "template": "setup_token_v2",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpMailTransport {
            http: reqwest::Client::new(),
            relay_url: Some(server.uri()),
            from_address: "sunray@localhost".into(),
        };

        assert!(transport.send(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_without_relay_is_not_configured() {
        let transport = HttpMailTransport {
            http: reqwest::Client::new(),
            relay_url: None,
            from_address: "sunray@localhost".into(),
        };

        assert!(matches!(
            transport.send(&message()).await,
            Err(MailError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_send_maps_relay_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = HttpMailTransport {
            http: reqwest::Client::new(),
            relay_url: Some(server.uri()),
            from_address: "sunray@localhost".into(),
        };

        assert!(matches!(
            transport.send(&message()).await,
            Err(MailError::Status { status: 500 })
        ));
    }
}
