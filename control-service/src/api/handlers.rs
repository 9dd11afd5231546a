//! # Request Handlers
//!
//! HTTP handlers bridging the REST surface with the service layer. Each
//! handler follows the same pattern:
//!
//! 1. **Authenticate** the Bearer API key (except `/status` and the
//!    shallow `/health`)
//! 2. **Validate** the body with the `validator` crate - before any state
//!    is touched
//! 3. **Call** the service layer
//! 4. **Shape** the wire response
//!
//! All handlers return `Result<HttpResponse, ApiError>`; the `ApiError`
//! type converts to the right status code and `{error, code}` body via its
//! `ResponseError` implementation.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use shared::validation::ip_in_list;
use shared::{errors::ApiError, validation};
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::events::{AuditEvent, AuditEventType, Severity};
use crate::domain::registration::RegistrationOutcome;
use crate::repository::settings_repository::keys;
use crate::service::session_service::{CreateRemoteSessionParams, CreateSessionParams};
use crate::service::token_service::IssueTokenParams;
use crate::AppState;

use super::dto::*;

// =============================================================================
// REQUEST HELPERS
// =============================================================================

/// Raw `Authorization` header value, if present.
fn auth_header(req: &HttpRequest) -> Option<&str> {
    req.headers().get("Authorization")?.to_str().ok()
}

/// Worker identity header set by edge workers on every call.
fn worker_name(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("X-Worker-ID")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Client IP, preferring the CDN-provided header over the socket peer.
/// Never trusts a client-supplied body field.
fn client_ip(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("CF-Connecting-IP")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| req.connection_info().peer_addr().map(String::from))
}

fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Parses an IP from either a bare address or a `host:port` socket string.
fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<std::net::SocketAddr>().ok().map(|s| s.ip()))
}

/// Admin endpoints additionally honor `sunray.admin_ip_whitelist`: when the
/// parameter is set (comma-separated IPs/CIDRs), requests from outside the
/// list are rejected with 403. An unset parameter means no restriction.
async fn require_admin_ip(state: &AppState, req: &HttpRequest) -> Result<(), ApiError> {
    let whitelist = state
        .settings_repo
        .get(keys::ADMIN_IP_WHITELIST)
        .await?
        .filter(|w| !w.trim().is_empty());
    let Some(whitelist) = whitelist else {
        return Ok(());
    };

    let entries: Vec<String> = whitelist
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let permitted = client_ip(req)
        .as_deref()
        .and_then(parse_ip)
        .map(|ip| ip_in_list(ip, &entries))
        .unwrap_or(false);

    if permitted {
        Ok(())
    } else {
        tracing::warn!(ip = ?client_ip(req), "Admin endpoint rejected by IP whitelist");
        Err(ApiError::AccessDenied)
    }
}

// =============================================================================
// STATUS & HEALTH
// =============================================================================

/// `GET /sunray-srvr/v1/status` - unauthenticated liveness check that
/// echoes request metadata, useful when debugging proxy chains.
pub async fn status(req: HttpRequest) -> HttpResponse {
    let headers = req.headers();
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let mut caller_info = serde_json::Map::new();
    let interesting = [
        ("remote_addr", req.connection_info().peer_addr().map(String::from)),
        ("x_forwarded_for", header("X-Forwarded-For").map(String::from)),
        ("x_real_ip", header("X-Real-IP").map(String::from)),
        ("cf_connecting_ip", header("CF-Connecting-IP").map(String::from)),
        ("cf_ipcountry", header("CF-IPCountry").map(String::from)),
        ("cf_ray", header("CF-RAY").map(String::from)),
        ("host", header("Host").map(String::from)),
        ("user_agent", header("User-Agent").map(String::from)),
        ("origin", header("Origin").map(String::from)),
        ("referer", header("Referer").map(String::from)),
    ];
    for (key, value) in interesting {
        if let Some(value) = value {
            caller_info.insert(key.to_string(), serde_json::Value::String(value));
        }
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "sunray-control",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "caller_info": caller_info,
    }))
}

/// `GET /sunray-srvr/v1/health` - shallow for anonymous callers, deeper
/// (database reachability, resource counts) when authenticated.
pub async fn health(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let mut body = serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    });

    if state.auth.authenticate(auth_header(&req)).await.is_ok() {
        match health_details(&state).await {
            Ok(details) => {
                body["database"] = "connected".into();
                body["resources"] = details;
            }
            Err(e) => {
                tracing::error!(error = %e, "Health check degraded");
                body["status"] = "degraded".into();
                body["database"] = "unreachable".into();
            }
        }
    }

    HttpResponse::Ok().json(body)
}

async fn health_details(state: &AppState) -> Result<serde_json::Value, ApiError> {
    shared::database::health_check(&state.db_pool).await?;
    Ok(serde_json::json!({
        "hosts": state.hosts_repo.count_active().await?,
        "users": state.users_repo.count_active().await?,
        "active_sessions": state.sessions_repo.count_active().await?,
        "api_keys": state.api_keys_repo.count_active().await?,
        "audit_entries": state.audit.count().await?,
    }))
}

// =============================================================================
// CONFIG SNAPSHOT
// =============================================================================

/// `GET /sunray-srvr/v1/config` - the full configuration document. The
/// snapshot is the authority; workers reconcile their caches to it.
pub async fn get_config(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let snapshot = state.config.snapshot(worker_name(&req), client_ip(&req)).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

// =============================================================================
// USERS
// =============================================================================

/// `POST /sunray-srvr/v1/users/check` → `{exists: bool}`.
pub async fn check_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CheckUserRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let exists = state
        .users_repo
        .find_active_by_username(&body.username)
        .await?
        .is_some();
    Ok(HttpResponse::Ok().json(ExistsResponse { exists }))
}

/// `POST /sunray-srvr/v1/users/validate` - login-UI discovery. Unknown
/// usernames get the structurally identical all-false response.
pub async fn validate_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ValidateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let result = state
        .tokens
        .validate_user(&body.username, &body.host, client_ip(&req))
        .await?;

    Ok(HttpResponse::Ok().json(UserValidationResponse {
        user_exists: result.user_exists,
        has_passkey: result.has_passkey,
        has_valid_token: result.has_valid_token,
        remote_login_allowed: result.remote_login_allowed,
    }))
}

/// `POST /sunray-srvr/v1/users` - admin: create a user.
pub async fn create_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let user = state
        .hosts_svc
        .create_user(&body.username, &body.email, body.display_name.as_deref())
        .await?;
    Ok(HttpResponse::Created().json(user))
}

// =============================================================================
// SETUP TOKENS
// =============================================================================

/// `POST /sunray-srvr/v1/setup-tokens/validate` - worker-side token check.
///
/// Responses are 200 with `{valid: false, error}` for the contractual
/// failure messages; only authentication and malformed bodies use 4xx.
pub async fn validate_setup_token(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ValidateSetupTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let result = state
        .tokens
        .validate_token(&body.username, &body.token_hash, &body.client_ip)
        .await?;

    let response = SetupTokenValidationResponse {
        valid: result.valid,
        error: result.error.map(String::from),
        user: result.user.map(|u| TokenUserInfo {
            display_name: u.display_name_or_username().to_string(),
            username: u.username,
            email: u.email,
        }),
    };
    Ok(HttpResponse::Ok().json(response))
}

/// `POST /sunray-srvr/v1/users/{username}/setup-tokens` - admin issuance.
/// The plain token appears in this response and nowhere else, ever.
pub async fn issue_setup_token(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<IssueSetupTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let username = path.into_inner();
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let issued = state
        .tokens
        .issue_token(
            &username,
            &body.host,
            IssueTokenParams {
                device_name: body.device_name,
                validity_hours: body.validity_hours,
                max_uses: body.max_uses,
                allowed_cidrs: body.allowed_cidrs,
                send_email: body.send_email,
            },
        )
        .await?;

    Ok(HttpResponse::Created().json(IssuedSetupTokenResponse {
        token: issued.plain_token,
        expires_at: issued.token.expires_at,
        max_uses: issued.token.max_uses,
        email_sent: issued.email.as_ref().map(|e| e.success),
        email_error: issued.email.and_then(|e| e.error),
    }))
}

// =============================================================================
// EMAIL OTP
// =============================================================================

/// `POST /sunray-srvr/v1/email-otp/request` - timing-safe OTP request.
/// The response never reveals whether the email maps to an account.
pub async fn request_email_otp(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RequestOtpRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let result = state
        .otps
        .request_otp(
            &body.email,
            &body.host,
            &body.browser_token_hash,
            client_ip(&req),
            user_agent(&req),
        )
        .await?;

    Ok(HttpResponse::Ok().json(OtpRequestResponse {
        otp_request_id: result.otp_request_id,
        expires_at: result.expires_at,
        resend_available_at: result.resend_available_at,
    }))
}

/// `POST /sunray-srvr/v1/email-otp/validate` - ordered checks, browser
/// binding before the code; failures return 200 with an `error_code`.
pub async fn validate_email_otp(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ValidateOtpRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let result = state
        .otps
        .validate_otp(
            &body.email,
            &body.otp_code,
            &body.otp_request_id,
            &body.browser_token_hash,
            &body.host,
            client_ip(&req),
            user_agent(&req),
        )
        .await?;

    Ok(HttpResponse::Ok().json(OtpValidationResponse {
        valid: result.valid,
        username: result.username,
        session_duration_s: result.session_duration_s,
        error_code: result.error_code,
    }))
}

// =============================================================================
// PASSKEYS & AUTH REPORTS
// =============================================================================

/// `POST /sunray-srvr/v1/users/{username}/passkeys` - worker reports a
/// newly registered credential.
pub async fn register_passkey(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RegisterPasskeyRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let username = path.into_inner();
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let user = state
        .users_repo
        .find_active_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("user:{username}") })?;

    let passkey = state
        .passkeys_repo
        .create(
            crate::repository::passkey_repository::NewPasskey {
                user_id: user.id,
                credential_id: body.credential_id,
                public_key: body.public_key,
                name: body.name,
                host_domain: body.host_domain,
                backup_eligible: body.backup_eligible,
                backup_state: body.backup_state,
                created_ip: body.client_ip.or_else(|| client_ip(&req)),
                created_user_agent: body.user_agent.or_else(|| user_agent(&req)),
            },
            &user.username,
        )
        .await?;

    Ok(HttpResponse::Created()
        .json(serde_json::json!({ "success": true, "passkey_id": passkey.id })))
}

/// `POST /sunray-srvr/v1/auth/verify` - worker reports a successful
/// passkey authentication. No cryptographic verification happens here; the
/// control plane checks the credential's rpId binding and records the
/// event.
pub async fn verify_auth(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<VerifyAuthRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;
    let ip = body.client_ip.clone().or_else(|| client_ip(&req));

    let user = match state.users_repo.find_active_by_username(&body.username).await? {
        Some(user) => user,
        None => {
            state
                .audit
                .append(
                    AuditEvent::new(AuditEventType::AuthFailure)
                        .ip(ip)
                        .details(serde_json::json!({
                            "username": body.username,
                            "reason": "unknown user",
                        })),
                )
                .await?;
            return Err(ApiError::NotFound { resource: format!("user:{}", body.username) });
        }
    };

    let passkey = state.passkeys_repo.find_by_credential_id(&body.credential_id).await?;
    let passkey = match passkey.filter(|p| p.user_id == user.id) {
        Some(passkey) => passkey,
        None => {
            state
                .audit
                .append(
                    AuditEvent::new(AuditEventType::AuthFailure)
                        .user(user.id, &user.username)
                        .ip(ip)
                        .details(serde_json::json!({
                            "credential_id": body.credential_id,
                            "reason": "unknown credential",
                        })),
                )
                .await?;
            return Err(ApiError::NotFound { resource: "credential".to_string() });
        }
    };

    // rpId binding check: a credential registered for one host must never
    // authenticate another (unbound legacy credentials need re-registration)
    if passkey.host_domain.as_deref() != Some(body.host.as_str()) {
        state
            .audit
            .append(
                AuditEvent::new(AuditEventType::HostIdMismatch)
                    .severity(Severity::Warning)
                    .user(user.id, &user.username)
                    .ip(ip)
                    .details(serde_json::json!({
                        "credential_id": body.credential_id,
                        "registered_host": passkey.host_domain,
                        "presented_host": body.host,
                    })),
            )
            .await?;
        return Err(ApiError::NotFound { resource: "credential".to_string() });
    }

    state.passkeys_repo.touch_last_used(&body.credential_id).await?;
    state
        .audit
        .append(
            AuditEvent::new(AuditEventType::AuthSuccess)
                .user(user.id, &user.username)
                .ip(ip)
                .details(serde_json::json!({
                    "credential_id": body.credential_id,
                    "host": body.host,
                })),
        )
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "user": {
            "id": user.id,
            "username": user.username,
            "email": user.email,
            "display_name": user.display_name_or_username(),
        },
    })))
}

/// `DELETE /sunray-srvr/v1/passkeys/{credential_id}` - admin revocation.
pub async fn revoke_passkey(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let credential_id = path.into_inner();

    let passkey = state
        .passkeys_repo
        .find_by_credential_id(&credential_id)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("passkey:{credential_id}") })?;
    let username = state
        .users_repo
        .find_by_id(passkey.user_id)
        .await?
        .map(|u| u.username)
        .unwrap_or_default();

    state.passkeys_repo.revoke(&credential_id, &username).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::ok("Passkey revoked")))
}

// =============================================================================
// SESSIONS
// =============================================================================

/// `POST /sunray-srvr/v1/sessions` - worker records a normal session.
pub async fn create_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let session = state
        .sessions
        .create_session(CreateSessionParams {
            username: body.username,
            host_domain: body.host_domain,
            session_id: body.session_id,
            credential_id: body.credential_id,
            created_ip: body.created_ip,
            device_fingerprint: body.device_fingerprint,
            user_agent: body.user_agent,
            csrf_token: body.csrf_token,
            duration_s: body.duration,
        })
        .await?;

    Ok(HttpResponse::Created().json(SessionCreatedResponse {
        success: true,
        session_id: session.session_id,
    }))
}

/// `POST /sunray-srvr/v1/sessions/remote` - remote session after edge-side
/// WebAuthn verification (paid path).
pub async fn create_remote_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateRemoteSessionRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let session = state
        .sessions
        .create_remote_session(CreateRemoteSessionParams {
            worker_name: body.worker_id,
            host_id: body.protected_host_id,
            user_id: body.user_id,
            session_duration: body.session_duration,
            device_info: body.device_info,
        })
        .await?;

    Ok(HttpResponse::Created().json(RemoteSessionCreatedResponse {
        success: true,
        session_id: session.session_id,
        user_id: session.user_id,
        expires_at: session.expires_at,
        session_type: session.session_type,
    }))
}

/// `GET /sunray-srvr/v1/sessions/list/{user_id}` - worker-proxied listing
/// for the session-management UI.
pub async fn list_sessions(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let user_id = path.into_inner();

    let sessions = state.sessions.list_user_sessions(user_id, worker_name(&req)).await?;
    Ok(HttpResponse::Ok().json(sessions))
}

/// `DELETE /sunray-srvr/v1/sessions/{session_id}` - user-initiated
/// termination. The worker validated the management JWT and vouches for
/// the `X-User-ID` header; a mismatch is 403.
pub async fn terminate_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let session_id = path.into_inner();

    let user_id = req
        .headers()
        .get("X-User-ID")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest {
            message: "X-User-ID header required".to_string(),
        })?;
    let user_id = Uuid::parse_str(user_id).map_err(|_| ApiError::BadRequest {
        message: "X-User-ID must be a UUID".to_string(),
    })?;

    state
        .sessions
        .terminate_session(&session_id, user_id, worker_name(&req))
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Session terminated successfully",
        "session_id": session_id,
    })))
}

/// `POST /sunray-srvr/v1/sessions/{session_id}/revoke` - admin/API revoke;
/// local-first, fan-out degrades gracefully.
pub async fn revoke_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<RevokeSessionRequest>>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let session_id = path.into_inner();
    let reason = body
        .and_then(|b| b.into_inner().reason)
        .unwrap_or_else(|| "API revocation".to_string());

    let summary = state.sessions.revoke_session(&session_id, &reason).await?;
    Ok(HttpResponse::Ok().json(RevocationResponse {
        success: true,
        revoked_sessions: summary.revoked_count,
        cache_cleared: summary.cache_cleared,
    }))
}

/// `POST /sunray-srvr/v1/users/{username}/sessions/revoke` - bulk
/// revocation of one user's sessions, scoped to a host or a whole worker.
pub async fn revoke_user_sessions(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RevokeUserSessionsRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let username = path.into_inner();
    let body = body.into_inner();
    let reason = body.reason.unwrap_or_else(|| "Bulk revocation".to_string());

    let summary = match (body.host_domain, body.worker_name) {
        (Some(host), None) => {
            state
                .sessions
                .revoke_user_sessions_on_host(&username, &host, &reason)
                .await?
        }
        (None, Some(worker)) => {
            state
                .sessions
                .revoke_user_sessions_on_worker(&username, &worker, &reason)
                .await?
        }
        _ => {
            return Err(ApiError::BadRequest {
                message: "Exactly one of host_domain or worker_name is required".to_string(),
            })
        }
    };

    Ok(HttpResponse::Ok().json(RevocationResponse {
        success: true,
        revoked_sessions: summary.revoked_count,
        cache_cleared: summary.cache_cleared,
    }))
}

// =============================================================================
// SECURITY EVENTS & WEBHOOKS
// =============================================================================

/// `POST /sunray-srvr/v1/security-events` - worker-reported observation.
/// The event type must belong to the declared taxonomy; unknown strings
/// are rejected with 400 rather than polluting the audit stream.
pub async fn log_security_event(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<SecurityEventRequest>,
) -> Result<HttpResponse, ApiError> {
    let api_key = state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let event_type = AuditEventType::from_str(&body.event_type).map_err(|e| {
        ApiError::BadRequest { message: e.to_string() }
    })?;
    let severity = body
        .severity
        .as_deref()
        .and_then(|s| Severity::from_str(s).ok())
        .unwrap_or(Severity::Warning);

    let ip = body.details["ip"]
        .as_str()
        .map(String::from)
        .or_else(|| client_ip(&req));
    let ua = body.details["user_agent"].as_str().map(String::from);

    let mut event = AuditEvent::new(event_type)
        .severity(severity)
        .api_key(api_key.id)
        .ip(ip)
        .user_agent(ua)
        .source("worker")
        .details(body.details);
    if let Some(name) = worker_name(&req) {
        event = event.worker(&name);
    }
    state.audit.append(event).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// `POST /sunray-srvr/v1/webhooks/track-usage` - usage counter for webhook
/// tokens. Unknown tokens are acknowledged without effect, so workers
/// cannot probe for valid values through this endpoint.
pub async fn track_webhook_usage(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TrackWebhookUsageRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    if let Some(token) = state.webhooks_repo.find_by_token(&body.token).await? {
        let host_domain = state
            .hosts_repo
            .find_by_id(token.host_id)
            .await?
            .map(|h| h.domain)
            .unwrap_or_default();
        state
            .webhooks_repo
            .track_usage(&token, &host_domain, body.client_ip.or_else(|| client_ip(&req)))
            .await?;
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// `POST /sunray-srvr/v1/webhook-tokens/{id}/regenerate` - admin rotation.
pub async fn regenerate_webhook_token(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let token_id = path.into_inner();

    let token = state
        .webhooks_repo
        .find_by_id(token_id)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("webhook_token:{token_id}") })?;
    let host_domain = state
        .hosts_repo
        .find_by_id(token.host_id)
        .await?
        .map(|h| h.domain)
        .unwrap_or_default();

    let updated = state.webhooks_repo.regenerate(token_id, &host_domain).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "name": updated.name,
        "token": updated.token,
    })))
}

// =============================================================================
// WORKERS & MIGRATION
// =============================================================================

/// `POST /sunray-srvr/v1/workers/register` - idempotent registration,
/// carrying the worker name in `X-Worker-ID` and the fronted hostname in
/// the body. Drives re-registration, initial binding and migration.
pub async fn register_worker(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RegisterWorkerRequest>,
) -> Result<HttpResponse, ApiError> {
    let api_key = state.auth.authenticate(auth_header(&req)).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let name = worker_name(&req).ok_or_else(|| ApiError::BadRequest {
        message: "X-Worker-ID header is required".to_string(),
    })?;

    let result = state
        .workers
        .register(
            &name,
            &body.hostname,
            body.worker_url.as_deref(),
            &api_key,
            client_ip(&req),
        )
        .await?;

    let outcome = match result.outcome {
        RegistrationOutcome::ReRegistered => "re_registered",
        RegistrationOutcome::InitialBind => "registered",
        RegistrationOutcome::Migrated => "migrated",
        // register() already turned a conflict into an error
        RegistrationOutcome::Conflict => unreachable!("conflict is rejected in the service"),
    };

    Ok(HttpResponse::Ok().json(RegistrationResponse {
        success: true,
        result: outcome,
        hostname: result.host.domain,
        worker: result.worker.name,
    }))
}

/// `GET /sunray-srvr/v1/workers/{name}/migration-status` - protected host
/// count plus pending inbound/outbound migrations.
pub async fn migration_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let name = path.into_inner();
    let status = state.workers.migration_status(&name).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// `POST /sunray-srvr/v1/workers/{name}/sessions/clear` - the nuclear
/// option: every session on every host of the worker.
pub async fn nuclear_clear_worker(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<CacheRefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let name = path.into_inner();
    let reason = body
        .and_then(|b| b.into_inner().reason)
        .unwrap_or_else(|| "Admin nuclear clear".to_string());

    let summary = state.sessions.nuclear_clear_worker(&name, &reason).await?;
    Ok(HttpResponse::Ok().json(RevocationResponse {
        success: true,
        revoked_sessions: summary.revoked_count,
        cache_cleared: summary.cache_cleared,
    }))
}

/// `POST /sunray-srvr/v1/workers/{name}/cache/refresh` - clears every
/// configuration cache on the worker; failure is surfaced (502).
pub async fn refresh_worker_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<CacheRefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let name = path.into_inner();
    let reason = body
        .and_then(|b| b.into_inner().reason)
        .unwrap_or_else(|| "Admin config refresh".to_string());

    state.sessions.refresh_worker_config(&name, &reason).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::ok("Worker config caches cleared")))
}

// =============================================================================
// HOSTS & ADMIN
// =============================================================================

/// `POST /sunray-srvr/v1/hosts` - admin: create a host.
pub async fn create_host(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateHostRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let host = state.hosts_svc.create_host(&body.domain, &body.backend_url).await?;
    Ok(HttpResponse::Created().json(host))
}

/// `POST /sunray-srvr/v1/hosts/{domain}/users` - authorize a user on a
/// host (email-login authorization path).
pub async fn authorize_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AuthorizeUserRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let domain = path.into_inner();
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let newly = state.hosts_svc.authorize_user(&domain, &body.username).await?;
    let message = if newly {
        format!("User {} authorized on {domain}", body.username)
    } else {
        format!("User {} was already authorized on {domain}", body.username)
    };
    Ok(HttpResponse::Ok().json(MessageResponse::ok(message)))
}

/// `PATCH /sunray-srvr/v1/hosts/{domain}/timing` - session / WAF timing
/// overrides, validated against the configured maxima.
pub async fn update_host_timing(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateTimingRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let domain = path.into_inner();
    let body = body.into_inner();
    validation::validate_request(&body)?;

    if body.session_duration_s.is_none() && body.waf_bypass_revalidation_s.is_none() {
        return Err(ApiError::BadRequest {
            message: "At least one timing field is required".to_string(),
        });
    }

    let mut host = None;
    if let Some(seconds) = body.session_duration_s {
        host = Some(state.hosts_svc.update_session_duration(&domain, seconds).await?);
    }
    if let Some(seconds) = body.waf_bypass_revalidation_s {
        host = Some(state.hosts_svc.update_waf_revalidation(&domain, seconds).await?);
    }

    Ok(HttpResponse::Ok().json(host))
}

/// `POST /sunray-srvr/v1/hosts/{domain}/pending-worker` - schedule a
/// migration; 409 if one is already pending.
pub async fn set_pending_worker(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetPendingWorkerRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let domain = path.into_inner();
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let host = state.workers.set_pending_worker(&domain, &body.worker_name).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "hostname": host.domain,
        "pending_worker": host.pending_worker_name,
        "migration_requested_at": host.migration_requested_at,
    })))
}

/// `DELETE /sunray-srvr/v1/hosts/{domain}/pending-worker` - cancel a
/// scheduled migration; 409 if none is pending.
pub async fn clear_pending_worker(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let domain = path.into_inner();

    state.workers.clear_pending_worker(&domain).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::ok("Pending migration cleared")))
}

/// `POST /sunray-srvr/v1/hosts/{domain}/cache/refresh` - immediate host
/// cache refresh; unlike revocation fan-out, a worker failure here is the
/// admin's problem and comes back as 502.
pub async fn force_refresh_host(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<CacheRefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let domain = path.into_inner();
    let reason = body
        .and_then(|b| b.into_inner().reason)
        .unwrap_or_else(|| "Manual refresh".to_string());

    state.sessions.force_refresh_host(&domain, &reason).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::ok(format!(
        "Worker caches will refresh for {domain} within 60 seconds"
    ))))
}

/// `POST /sunray-srvr/v1/hosts/{domain}/sessions/clear` - revoke every
/// session on one host.
pub async fn clear_host_sessions(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<CacheRefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let domain = path.into_inner();
    let reason = body
        .and_then(|b| b.into_inner().reason)
        .unwrap_or_else(|| "Admin host-wide revocation".to_string());

    let summary = state.sessions.clear_host_sessions(&domain, &reason).await?;
    Ok(HttpResponse::Ok().json(RevocationResponse {
        success: true,
        revoked_sessions: summary.revoked_count,
        cache_cleared: summary.cache_cleared,
    }))
}

// =============================================================================
// API KEYS
// =============================================================================

/// `POST /sunray-srvr/v1/api-keys` - admin: create a key. The value is
/// auto-generated when omitted and appears in full only in this response.
pub async fn create_api_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateApiKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let key = state
        .auth
        .create(
            &body.name,
            body.scopes.as_deref().unwrap_or("all"),
            body.description.as_deref(),
            body.key,
        )
        .await?;

    Ok(HttpResponse::Created().json(ApiKeyResponse {
        id: key.id,
        name: key.name,
        key: key.key,
        scopes: key.scopes,
        is_active: key.is_active,
    }))
}

/// `POST /sunray-srvr/v1/api-keys/{id}/regenerate` - rotate a key value.
pub async fn regenerate_api_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let key_id = path.into_inner();

    let key = state.auth.regenerate(key_id).await?;
    Ok(HttpResponse::Ok().json(ApiKeyResponse {
        id: key.id,
        name: key.name,
        key: key.key,
        scopes: key.scopes,
        is_active: key.is_active,
    }))
}

/// `DELETE /sunray-srvr/v1/api-keys/{id}` - delete a key (audited).
pub async fn delete_api_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let key_id = path.into_inner();

    state.auth.delete(key_id).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::ok("API key deleted")))
}

// =============================================================================
// AUDIT LOG, EXCEPTIONS & SETTINGS
// =============================================================================

/// `GET /sunray-srvr/v1/audit-log?limit=&event_type=` - read-only admin
/// view of the most recent audit entries, details parsed into JSON.
pub async fn list_audit_log(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<AuditLogQuery>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let query = query.into_inner();

    let entries = state
        .audit
        .recent(query.limit.unwrap_or(100), query.event_type.as_deref())
        .await?;

    let rows: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "timestamp": e.timestamp,
                "event_type": e.event_type,
                "severity": e.severity,
                "username": e.username,
                "sunray_worker": e.sunray_worker,
                "ip_address": e.ip_address,
                "event_source": e.event_source,
                "details": e.details_value(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(rows))
}

/// `GET /sunray-srvr/v1/hosts/{domain}/exceptions` - the composed access
/// exception tree the worker consults during request evaluation: typed
/// access rules in priority order plus the host-level lists.
pub async fn get_host_exceptions(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    let domain = path.into_inner();

    let host = state
        .hosts_repo
        .find_active_by_domain(&domain)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("host:{domain}") })?;

    let rules = state.hosts_repo.access_rules(host.id).await?;
    let exceptions: Vec<serde_json::Value> = rules
        .iter()
        .map(|r| {
            serde_json::json!({
                "type": r.rule_type,
                "value": r.rule_value,
                "description": r.description,
                "priority": r.priority,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "domain": host.domain,
        "exceptions": exceptions,
        "allowed_cidrs": host.allowed_cidr_list(),
        "public_url_patterns": host.public_url_pattern_list(),
        "token_url_patterns": host.token_url_pattern_list(),
    })))
}

/// `PUT /sunray-srvr/v1/settings/{key}` - upsert an admin-tunable process
/// parameter (the `sunray.*` / `remote_auth.*` keys).
pub async fn set_config_param(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetConfigParamRequest>,
) -> Result<HttpResponse, ApiError> {
    state.auth.authenticate(auth_header(&req)).await?;
    require_admin_ip(&state, &req).await?;
    let key = path.into_inner();
    let body = body.into_inner();
    validation::validate_request(&body)?;

    state.settings_repo.set(&key, &body.value).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::ok(format!("Parameter {key} updated"))))
}
