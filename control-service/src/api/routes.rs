//! # Route Configuration
//!
//! URL patterns of the control-plane API, all versioned under
//! `/sunray-srvr/v1`. The surface splits in three groups:
//!
//! ```text
//! /sunray-srvr/v1/
//! ├── status                                   GET    → status (unauthenticated)
//! ├── health                                   GET    → health (deeper if authenticated)
//! ├── config                                   GET    → get_config
//! │
//! ├── users/check                              POST   → check_user
//! ├── users/validate                           POST   → validate_user
//! ├── users                                    POST   → create_user
//! ├── users/{username}/passkeys                POST   → register_passkey
//! ├── users/{username}/setup-tokens            POST   → issue_setup_token
//! ├── users/{username}/sessions/revoke         POST   → revoke_user_sessions
//! ├── setup-tokens/validate                    POST   → validate_setup_token
//! ├── email-otp/request                        POST   → request_email_otp
//! ├── email-otp/validate                       POST   → validate_email_otp
//! ├── auth/verify                              POST   → verify_auth
//! ├── passkeys/{credential_id}                 DELETE → revoke_passkey
//! │
//! ├── sessions                                 POST   → create_session
//! ├── sessions/remote                          POST   → create_remote_session
//! ├── sessions/list/{user_id}                  GET    → list_sessions
//! ├── sessions/{session_id}                    DELETE → terminate_session
//! ├── sessions/{session_id}/revoke             POST   → revoke_session
//! │
//! ├── security-events                          POST   → log_security_event
//! ├── webhooks/track-usage                     POST   → track_webhook_usage
//! ├── webhook-tokens/{id}/regenerate           POST   → regenerate_webhook_token
//! │
//! ├── workers/register                         POST   → register_worker
//! ├── workers/{name}/migration-status          GET    → migration_status
//! ├── workers/{name}/sessions/clear            POST   → nuclear_clear_worker
//! ├── workers/{name}/cache/refresh             POST   → refresh_worker_config
//! │
//! ├── hosts                                    POST   → create_host
//! ├── hosts/{domain}/users                     POST   → authorize_user
//! ├── hosts/{domain}/timing                    PATCH  → update_host_timing
//! ├── hosts/{domain}/pending-worker            POST   → set_pending_worker
//! ├── hosts/{domain}/pending-worker            DELETE → clear_pending_worker
//! ├── hosts/{domain}/cache/refresh             POST   → force_refresh_host
//! ├── hosts/{domain}/sessions/clear            POST   → clear_host_sessions
//! │
//! ├── api-keys                                 POST   → create_api_key
//! ├── api-keys/{id}/regenerate                 POST   → regenerate_api_key
//! ├── api-keys/{id}                            DELETE → delete_api_key
//! │
//! ├── audit-log                                GET    → list_audit_log
//! ├── hosts/{domain}/exceptions                GET    → get_host_exceptions
//! └── settings/{key}                           PUT    → set_config_param
//! ```
//!
//! Everything except `status` and the shallow `health` requires a Bearer
//! API key; authentication happens inside each handler (the key's usage
//! counters are updated as a side effect).

use actix_web::web;

use super::handlers;

/// Configures all routes for the control service.
///
/// Called from `main.rs` during app initialization:
///
/// ```rust,ignore
/// App::new()
///     .configure(routes::configure)
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sunray-srvr/v1")
            // ─────────────────────────────────────────────────────────────
            // Liveness & health
            // ─────────────────────────────────────────────────────────────
            .route("/status", web::get().to(handlers::status))
            .route("/health", web::get().to(handlers::health))
            // ─────────────────────────────────────────────────────────────
            // Config snapshot
            // ─────────────────────────────────────────────────────────────
            .route("/config", web::get().to(handlers::get_config))
            // ─────────────────────────────────────────────────────────────
            // Users & credentials
            // ─────────────────────────────────────────────────────────────
            .route("/users/check", web::post().to(handlers::check_user))
            .route("/users/validate", web::post().to(handlers::validate_user))
            .route("/users", web::post().to(handlers::create_user))
            .route(
                "/users/{username}/passkeys",
                web::post().to(handlers::register_passkey),
            )
            .route(
                "/users/{username}/setup-tokens",
                web::post().to(handlers::issue_setup_token),
            )
            .route(
                "/users/{username}/sessions/revoke",
                web::post().to(handlers::revoke_user_sessions),
            )
            .route(
                "/setup-tokens/validate",
                web::post().to(handlers::validate_setup_token),
            )
            .route("/email-otp/request", web::post().to(handlers::request_email_otp))
            .route("/email-otp/validate", web::post().to(handlers::validate_email_otp))
            .route("/auth/verify", web::post().to(handlers::verify_auth))
            .route(
                "/passkeys/{credential_id}",
                web::delete().to(handlers::revoke_passkey),
            )
            // ─────────────────────────────────────────────────────────────
            // Sessions
            // ─────────────────────────────────────────────────────────────
            .route("/sessions", web::post().to(handlers::create_session))
            .route("/sessions/remote", web::post().to(handlers::create_remote_session))
            .route("/sessions/list/{user_id}", web::get().to(handlers::list_sessions))
            .route(
                "/sessions/{session_id}",
                web::delete().to(handlers::terminate_session),
            )
            .route(
                "/sessions/{session_id}/revoke",
                web::post().to(handlers::revoke_session),
            )
            // ─────────────────────────────────────────────────────────────
            // Worker-reported events & webhooks
            // ─────────────────────────────────────────────────────────────
            .route("/security-events", web::post().to(handlers::log_security_event))
            .route(
                "/webhooks/track-usage",
                web::post().to(handlers::track_webhook_usage),
            )
            .route(
                "/webhook-tokens/{id}/regenerate",
                web::post().to(handlers::regenerate_webhook_token),
            )
            // ─────────────────────────────────────────────────────────────
            // Worker lifecycle & migration
            // ─────────────────────────────────────────────────────────────
            .route("/workers/register", web::post().to(handlers::register_worker))
            .route(
                "/workers/{name}/migration-status",
                web::get().to(handlers::migration_status),
            )
            .route(
                "/workers/{name}/sessions/clear",
                web::post().to(handlers::nuclear_clear_worker),
            )
            .route(
                "/workers/{name}/cache/refresh",
                web::post().to(handlers::refresh_worker_config),
            )
            // ─────────────────────────────────────────────────────────────
            // Hosts & admin operations
            // ─────────────────────────────────────────────────────────────
            .route("/hosts", web::post().to(handlers::create_host))
            .route("/hosts/{domain}/users", web::post().to(handlers::authorize_user))
            .route("/hosts/{domain}/timing", web::patch().to(handlers::update_host_timing))
            .route(
                "/hosts/{domain}/pending-worker",
                web::post().to(handlers::set_pending_worker),
            )
            .route(
                "/hosts/{domain}/pending-worker",
                web::delete().to(handlers::clear_pending_worker),
            )
            .route(
                "/hosts/{domain}/cache/refresh",
                web::post().to(handlers::force_refresh_host),
            )
            .route(
                "/hosts/{domain}/sessions/clear",
                web::post().to(handlers::clear_host_sessions),
            )
            // ─────────────────────────────────────────────────────────────
            // API keys
            // ─────────────────────────────────────────────────────────────
            .route("/api-keys", web::post().to(handlers::create_api_key))
            .route(
                "/api-keys/{id}/regenerate",
                web::post().to(handlers::regenerate_api_key),
            )
            .route("/api-keys/{id}", web::delete().to(handlers::delete_api_key))
            // ─────────────────────────────────────────────────────────────
            // Audit log, exception trees & settings
            // ─────────────────────────────────────────────────────────────
            .route("/audit-log", web::get().to(handlers::list_audit_log))
            .route(
                "/hosts/{domain}/exceptions",
                web::get().to(handlers::get_host_exceptions),
            )
            .route("/settings/{key}", web::put().to(handlers::set_config_param)),
    );
}
