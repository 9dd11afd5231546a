//! # Application Error Types
//!
//! Unified error handling for the control-plane services with automatic HTTP
//! conversion.
//!
//! ## Error Categories
//!
//! | Category | Variants | Status |
//! |----------|----------|--------|
//! | Authentication | `MissingAuth`, `InvalidApiKey` | 401 |
//! | Authorization | `InsufficientScope`, `AccessDenied` | 403 |
//! | Validation | `ValidationError`, `BadRequest` | 400 |
//! | Resources | `NotFound` / `Conflict` | 404 / 409 |
//! | Lockout | `TooManyRequests` | 429 |
//! | Upstream | `UpstreamUnavailable` | 502 |
//! | Server | `DatabaseError`, `InternalError` | 500 |
//!
//! ## HTTP Response Format
//!
//! All errors are serialized to a consistent JSON format:
//!
//! ```json
//! {
//!   "error": "Host app.example.com is not yet bound to a worker",
//!   "code": "CONFLICT",
//!   "timestamp": "2026-01-15T10:30:00Z"
//! }
//! ```
//!
//! The `error` field carries the upstream message verbatim so the admin UI
//! can surface it in sticky notifications. Server-side errors (5xx) are
//! logged in full but return a generic message to the client.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::errors::{ApiError, ApiResult};
//!
//! async fn get_host(domain: &str) -> ApiResult<Host> {
//!     repo.find_by_domain(domain)
//!         .await?
//!         .ok_or_else(|| ApiError::NotFound { resource: format!("host:{domain}") })
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for handlers and services.
///
/// Use this instead of `Result<T, ApiError>` for cleaner signatures.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Main Error Enum
// =============================================================================

/// Application error type with automatic HTTP status mapping.
///
/// Each variant represents a specific error condition and maps to an
/// appropriate HTTP status code. The `#[error]` attribute defines the
/// error message format.
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Authentication Errors (401 Unauthorized)
    // =========================================================================
    /// Request doesn't include a `Authorization: Bearer <key>` header.
    #[error("Missing authentication")]
    MissingAuth,

    /// The presented API key does not match any active key.
    #[error("Unauthorized")]
    InvalidApiKey,

    // =========================================================================
    // Authorization Errors (403 Forbidden)
    // =========================================================================
    /// The API key is valid but its scopes don't cover the operation.
    #[error("API key lacks required scope: {scope}")]
    InsufficientScope {
        /// The `resource:action` scope that was required
        scope: String,
    },

    /// Caller can't operate on this specific resource (ownership check failed).
    /// Example: a worker terminating a session of a different user.
    #[error("Resource access denied")]
    AccessDenied,

    // =========================================================================
    // Validation Errors (400 Bad Request)
    // =========================================================================
    /// Request body failed validation rules.
    /// Contains field-level errors from the `validator` crate.
    #[error("Validation error")]
    ValidationError(#[from] ValidationErrors),

    /// Generic bad request with custom message.
    /// Use for validation that doesn't fit the validator pattern.
    #[error("{message}")]
    BadRequest {
        /// Human-readable description of what's wrong
        message: String,
    },

    // =========================================================================
    // Resource Errors (404 Not Found, 409 Conflict)
    // =========================================================================
    /// Requested resource doesn't exist.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g., "host:app.example.com")
        resource: String,
    },

    /// Action would violate a uniqueness constraint or business rule.
    /// Examples: duplicate domain, migration already pending.
    #[error("{resource}")]
    Conflict {
        /// Description of the conflict, surfaced verbatim to the admin UI
        resource: String,
    },

    // =========================================================================
    // Rate Limiting / Lockout (429 Too Many Requests)
    // =========================================================================
    /// Credential attempts exhausted (e.g., email-OTP lockout).
    #[error("Too many attempts")]
    TooManyRequests,

    // =========================================================================
    // Upstream Errors (502 Bad Gateway)
    // =========================================================================
    /// An outbound call to an edge worker failed. Only surfaced for explicit
    /// admin flows; session-revocation fan-out degrades gracefully instead.
    #[error("Worker unreachable: {message}")]
    UpstreamUnavailable {
        /// Cause reported by the HTTP client or the worker
        message: String,
    },

    // =========================================================================
    // Server Errors (500 Internal Server Error)
    // =========================================================================
    /// PostgreSQL query failed.
    /// Wraps `sqlx::Error`. Details logged, generic message returned.
    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    /// Unspecified internal error.
    /// Use as last resort when no specific variant applies.
    #[error("Internal server error")]
    InternalError {
        /// Internal message for logging (not exposed to client)
        message: String,
    },
}

// =============================================================================
// Error Methods
// =============================================================================

impl ApiError {
    /// Returns a machine-readable error code.
    ///
    /// These codes are stable and can be used by API clients for
    /// programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            // Authentication
            Self::MissingAuth => "MISSING_AUTH",
            Self::InvalidApiKey => "UNAUTHORIZED",
            // Authorization
            Self::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            Self::AccessDenied => "ACCESS_DENIED",
            // Validation
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::BadRequest { .. } => "BAD_REQUEST",
            // Resources
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            // Lockout
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            // Upstream
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            // Server
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// This is the source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized - Authentication required or failed
            Self::MissingAuth | Self::InvalidApiKey => StatusCode::UNAUTHORIZED,

            // 403 Forbidden - Authenticated but not authorized
            Self::InsufficientScope { .. } | Self::AccessDenied => StatusCode::FORBIDDEN,

            // 400 Bad Request - Client sent invalid data
            Self::ValidationError(_) | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found - Resource doesn't exist
            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict - Would violate uniqueness/business rules
            Self::Conflict { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests - Lockout counters exhausted
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway - Worker RPC failed on an admin flow
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error - Something went wrong on our side
            Self::DatabaseError(_) | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` if this is a server-side error (5xx).
    ///
    /// Server errors are logged at ERROR level and never expose internal
    /// details to clients. Client errors (4xx) are logged at WARN level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::InternalError { .. } | Self::UpstreamUnavailable { .. }
        )
    }
}

// =============================================================================
// Response Structure
// =============================================================================

/// Standard error response body for the API.
///
/// Edge workers key off the `error` field; the admin UI additionally uses
/// `code` to decide between sticky and transient notifications.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message, surfaced verbatim for conflict/validation
    pub error: String,

    /// Machine-readable error code for programmatic handling
    pub code: String,

    /// Additional error details (varies by error type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// When the error occurred (ISO 8601 format)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    /// Creates a new error response from an `ApiError`.
    ///
    /// Validation errors include field-level details; server errors are
    /// stripped down to a generic message.
    pub fn new(error: &ApiError) -> Self {
        let details = match error {
            ApiError::ValidationError(errors) => {
                Some(serde_json::to_value(errors).unwrap_or_default())
            }
            // Server errors: don't expose internals
            _ => None,
        };

        let message = if error.is_server_error() {
            // Generic message; the real cause went to the log
            match error {
                ApiError::UpstreamUnavailable { .. } => error.to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            error.to_string()
        };

        Self {
            error: message,
            code: error.error_code().to_string(),
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}

// =============================================================================
// Actix-web Integration
// =============================================================================

/// Implements Actix-web's `ResponseError` trait.
///
/// This allows returning `ApiError` directly from handlers:
///
/// ```rust,ignore
/// async fn handler() -> Result<HttpResponse, ApiError> {
///     Err(ApiError::NotFound { resource: "host:app.example.com".into() })
/// }
/// ```
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // Delegate to our implementation
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        if self.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        } else {
            tracing::warn!(error = %self, code = self.error_code(), "Request rejected");
        }
        let response = ErrorResponse::new(self);
        HttpResponse::build(self.status_code()).json(response)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_errors_return_401() {
        assert_eq!(ApiError::MissingAuth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidApiKey.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_authorization_errors_return_403() {
        let err = ApiError::InsufficientScope { scope: "session:write".into() };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::AccessDenied.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_resource_errors() {
        assert_eq!(
            ApiError::NotFound { resource: "host".to_string() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict { resource: "Migration already pending".to_string() }.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_lockout_maps_to_429() {
        assert_eq!(ApiError::TooManyRequests.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_upstream_failure_maps_to_502() {
        let err = ApiError::UpstreamUnavailable { message: "connect timeout".into() };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_conflict_message_survives_verbatim() {
        let err = ApiError::Conflict {
            resource: "Host app.example.com is not yet bound to a worker".to_string(),
        };
        let body = ErrorResponse::new(&err);
        assert_eq!(body.error, "Host app.example.com is not yet bound to a worker");
        assert_eq!(body.code, "CONFLICT");
    }

    #[test]
    fn test_server_errors_hide_internals() {
        let err = ApiError::InternalError { message: "secret stack trace".to_string() };
        let body = ErrorResponse::new(&err);
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_none());
    }
}
