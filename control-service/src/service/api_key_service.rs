//! # API Key Authentication
//!
//! Every control-plane endpoint except `/status` and the shallow `/health`
//! is Bearer-authenticated against the `api_keys` table. Authentication
//! also bumps the key's usage counters, which the admin UI shows to spot
//! stale keys.

use shared::errors::ApiError;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::ApiKey;
use crate::repository::ApiKeyRepository;

// =============================================================================
// API KEY SERVICE
// =============================================================================

/// Bearer authentication plus the key lifecycle operations.
#[derive(Clone)]
pub struct ApiKeyService {
    api_keys: ApiKeyRepository,
}

impl ApiKeyService {
    pub fn new(api_keys: ApiKeyRepository) -> Self {
        Self { api_keys }
    }

    /// Authenticates an `Authorization` header value.
    ///
    /// Returns the matched key (with usage tracked) or 401. The error does
    /// not distinguish "missing" from "wrong" beyond the status body, and
    /// nothing about existing keys leaks.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, auth_header: Option<&str>) -> Result<ApiKey, ApiError> {
        let header = auth_header.ok_or(ApiError::MissingAuth)?;
        let token = header.strip_prefix("Bearer ").ok_or(ApiError::MissingAuth)?;

        let api_key = self
            .api_keys
            .find_active_by_key(token)
            .await?
            .ok_or(ApiError::InvalidApiKey)?;

        // Usage tracking is best effort on the hot path; a failure here
        // must not fail the authenticated request
        if let Err(e) = self.api_keys.track_usage(api_key.id).await {
            tracing::warn!(error = %e, key = %api_key.name, "Failed to track API key usage");
        }

        tracing::debug!(key = %api_key.key_display(), name = %api_key.name, "API key authenticated");
        Ok(api_key)
    }

    /// Authenticates and additionally requires a scope.
    pub async fn authenticate_scoped(
        &self,
        auth_header: Option<&str>,
        required_scope: &str,
    ) -> Result<ApiKey, ApiError> {
        let api_key = self.authenticate(auth_header).await?;
        if !api_key.has_scope(required_scope) {
            return Err(ApiError::InsufficientScope {
                scope: required_scope.to_string(),
            });
        }
        Ok(api_key)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Creates a key; the value is auto-generated when not provided and
    /// returned exactly once in the created row.
    pub async fn create(
        &self,
        name: &str,
        scopes: &str,
        description: Option<&str>,
        key: Option<String>,
    ) -> Result<ApiKey, ApiError> {
        self.api_keys.create(name, scopes, description, key).await
    }

    /// Rotates a key value. Copy it now; it won't be shown again in full.
    pub async fn regenerate(&self, key_id: Uuid) -> Result<ApiKey, ApiError> {
        self.api_keys.regenerate(key_id).await
    }

    pub async fn delete(&self, key_id: Uuid) -> Result<(), ApiError> {
        self.api_keys.delete(key_id).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    // Bearer parsing edge cases are covered here; the database lookup side
    // is exercised by the handler flows against a live store.

    #[test]
    fn test_bearer_prefix_is_case_sensitive() {
        // `strip_prefix("Bearer ")` intentionally rejects `bearer` -
        // workers send the canonical form and lenient parsing would only
        // mask misconfigured callers.
        assert!("bearer abc".strip_prefix("Bearer ").is_none());
        assert_eq!("Bearer abc".strip_prefix("Bearer "), Some("abc"));
    }
}
