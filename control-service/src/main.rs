//! # Sunray Control Plane - Control Service
//!
//! The **control-service** is the stateful backbone of the Sunray
//! zero-trust access platform. Edge workers front customer domains and
//! enforce authentication; this service is their source of truth.
//!
//! ## Architecture Overview
//!
//! This service follows **Clean Architecture** principles with clear
//! separation between layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HTTP Layer (api/)                        │
//! │        routes  ·  handlers  ·  DTOs (Request/Response)          │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Service Layer (service/)                     │
//! │  Tokens · OTPs · Sessions & Revocation · Workers & Migration    │
//! │  Hosts & Go-Live · Config Snapshot · Worker RPC · Mail          │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Repository Layer (repository/)                 │
//! │     sqlx + PostgreSQL, single-transaction write paths,          │
//! │     row locks for token/OTP consumption, audit-in-transaction   │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Domain Layer (domain/)                      │
//! │  Entities · Audit taxonomy · Host state machine · Cache scopes  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## API Surface
//!
//! Everything lives under `/sunray-srvr/v1`; see [`api::routes`] for the
//! full tree. Workers authenticate with Bearer API keys; outbound cache
//! invalidations go to `https://<host>/sunray-wrkr/v1/cache/clear`.
//!
//! ## Configuration
//!
//! Process settings come from the environment via
//! [`shared::config::AppConfig`]; admin-tunable parameters (session
//! maxima, token wizard defaults, remote-auth timings) live in the
//! `config_params` table and take effect without a restart.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use shared::{config::AppConfig, database, tracing_config};
use std::sync::Arc;
use tracing::info;

mod api;
mod domain;
mod jobs;
mod repository;
mod service;

use api::routes;
use repository::{
    ApiKeyRepository, AuditRepository, HostRepository, PasskeyRepository, SessionRepository,
    SettingsRepository, TokenRepository, UserRepository, WebhookRepository, WorkerRepository,
};
use service::mailer::HttpMailTransport;
use service::worker_client::WorkerRpcClient;
use service::{
    ApiKeyService, ConfigService, HostService, OtpService, SessionService, TokenService,
    WorkerService,
};

/// Shared application state injected into all request handlers.
///
/// Services carry the business logic; the repositories are exposed
/// alongside for the thin read paths (health counts, existence checks)
/// that don't warrant a service method.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub auth: ApiKeyService,
    pub config: ConfigService,
    pub tokens: TokenService,
    pub otps: OtpService,
    pub sessions: SessionService,
    pub workers: WorkerService,
    pub hosts_svc: HostService,
    pub audit: AuditRepository,
    pub users_repo: UserRepository,
    pub hosts_repo: HostRepository,
    pub sessions_repo: SessionRepository,
    pub api_keys_repo: ApiKeyRepository,
    pub passkeys_repo: PasskeyRepository,
    pub webhooks_repo: WebhookRepository,
    pub settings_repo: SettingsRepository,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ─────────────────────────────────────────────────────────────────────
    // Step 1: Configuration & tracing
    // ─────────────────────────────────────────────────────────────────────
    let config = AppConfig::from_env().expect("Failed to load configuration");
    tracing_config::init_tracing(&config.service_name, config.is_production());

    info!(
        service = %config.service_name,
        host = %config.server.host,
        port = %config.server.port,
        "Starting control-service"
    );

    // ─────────────────────────────────────────────────────────────────────
    // Step 2: Database pool & migrations
    // ─────────────────────────────────────────────────────────────────────
    let db_pool = database::create_pool(&config.database)
        .await
        .expect("Failed to create database pool");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // ─────────────────────────────────────────────────────────────────────
    // Step 3: Repositories
    // ─────────────────────────────────────────────────────────────────────
    let audit = AuditRepository::new(db_pool.clone());
    let users_repo = UserRepository::new(db_pool.clone());
    let hosts_repo = HostRepository::new(db_pool.clone());
    let workers_repo = WorkerRepository::new(db_pool.clone());
    let api_keys_repo = ApiKeyRepository::new(db_pool.clone());
    let passkeys_repo = PasskeyRepository::new(db_pool.clone());
    let sessions_repo = SessionRepository::new(db_pool.clone());
    let tokens_repo = TokenRepository::new(db_pool.clone());
    let webhooks_repo = WebhookRepository::new(db_pool.clone());
    let settings_repo = SettingsRepository::new(db_pool.clone());

    // ─────────────────────────────────────────────────────────────────────
    // Step 4: Outbound adapters & services
    // ─────────────────────────────────────────────────────────────────────
    let invalidator = Arc::new(WorkerRpcClient::new());
    let mailer = Arc::new(HttpMailTransport::new(&config.mail));

    let auth = ApiKeyService::new(api_keys_repo.clone());
    let config_svc = ConfigService::new(
        users_repo.clone(),
        passkeys_repo.clone(),
        hosts_repo.clone(),
        webhooks_repo.clone(),
        settings_repo.clone(),
        audit.clone(),
    );
    let tokens = TokenService::new(
        tokens_repo.clone(),
        users_repo.clone(),
        hosts_repo.clone(),
        passkeys_repo.clone(),
        settings_repo.clone(),
        audit.clone(),
        mailer.clone(),
    );
    let otps = OtpService::new(
        tokens_repo.clone(),
        users_repo.clone(),
        hosts_repo.clone(),
        audit.clone(),
        mailer,
    );
    let sessions = SessionService::new(
        sessions_repo.clone(),
        users_repo.clone(),
        hosts_repo.clone(),
        workers_repo.clone(),
        api_keys_repo.clone(),
        audit.clone(),
        invalidator,
    );
    let workers = WorkerService::new(workers_repo, hosts_repo.clone(), audit.clone());
    let hosts_svc = HostService::new(
        hosts_repo.clone(),
        users_repo.clone(),
        settings_repo.clone(),
        audit.clone(),
    );

    // ─────────────────────────────────────────────────────────────────────
    // Step 5: Background jobs (go-live, cleanups, retention)
    // ─────────────────────────────────────────────────────────────────────
    jobs::spawn_background_jobs(
        hosts_svc.clone(),
        otps.clone(),
        sessions.clone(),
        audit.clone(),
    );

    let app_state = web::Data::new(AppState {
        db_pool,
        auth,
        config: config_svc,
        tokens,
        otps,
        sessions,
        workers,
        hosts_svc,
        audit,
        users_repo,
        hosts_repo,
        sessions_repo,
        api_keys_repo,
        passkeys_repo,
        webhooks_repo,
        settings_repo,
    });

    // ─────────────────────────────────────────────────────────────────────
    // Step 6: HTTP server
    // ─────────────────────────────────────────────────────────────────────
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    info!("Server listening on {}:{}", server_host, server_port);

    let mut server = HttpServer::new(move || {
        // Workers call cross-origin from edge runtimes; the API is Bearer
        // authenticated so CORS stays permissive
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "DELETE", "PATCH", "OPTIONS"])
            .allowed_headers(vec![
                "Authorization",
                "Content-Type",
                "X-Worker-ID",
                "X-User-ID",
            ])
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .bind((server_host, server_port))?;

    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    server.run().await
}
