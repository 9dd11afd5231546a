//! # Worker Repository
//!
//! PostgreSQL access for edge worker identities and the migration status
//! projection (protected host counts, pending inbound/outbound migrations).

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::Worker;
use crate::repository::user_repository::map_unique_violation;

const WORKER_COLUMNS: &str =
    "id, name, worker_type, worker_url, api_key_id, is_active, config_version, created_at, updated_at";

/// One pending migration edge, as shown in the status projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    /// Domain of the host being migrated
    pub host: String,
    /// Worker name on the other end of the migration
    pub worker: String,
}

// =============================================================================
// WORKER REPOSITORY
// =============================================================================

/// Repository for worker rows.
#[derive(Clone)]
pub struct WorkerRepository {
    pool: PgPool,
}

impl WorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, worker_id: Uuid) -> Result<Option<Worker>, ApiError> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, Worker>(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    #[instrument(skip(self), fields(name = %name))]
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Worker>, ApiError> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE name = $1");
        sqlx::query_as::<_, Worker>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Creates a worker identity. Workers self-register on their first API
    /// call, bound to the API key they authenticated with.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn create(
        &self,
        name: &str,
        worker_type: &str,
        worker_url: Option<&str>,
        api_key_id: Uuid,
    ) -> Result<Worker, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO workers (id, name, worker_type, worker_url, api_key_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {WORKER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Worker>(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(worker_type)
            .bind(worker_url)
            .bind(api_key_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation("worker name already registered"))
    }

    // =========================================================================
    // MIGRATION STATUS PROJECTION
    // =========================================================================

    /// Number of hosts currently bound to this worker.
    pub async fn protected_host_count(&self, worker_id: Uuid) -> Result<i64, ApiError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM hosts WHERE worker_id = $1")
                .bind(worker_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::DatabaseError)?;
        Ok(count.0)
    }

    /// Hosts this worker currently binds whose pending target is another
    /// worker (migrations leaving this worker).
    pub async fn pending_outbound(&self, worker_id: Uuid) -> Result<Vec<PendingMigration>, ApiError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT domain, pending_worker_name FROM hosts
            WHERE worker_id = $1 AND pending_worker_name IS NOT NULL
            ORDER BY domain
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|(host, worker)| PendingMigration { host, worker })
            .collect())
    }

    /// Hosts bound to other workers whose pending target is this worker's
    /// name (migrations arriving at this worker).
    pub async fn pending_inbound(&self, worker_name: &str) -> Result<Vec<PendingMigration>, ApiError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT h.domain, w.name FROM hosts h
            LEFT JOIN workers w ON w.id = h.worker_id
            WHERE h.pending_worker_name = $1
            ORDER BY h.domain
            "#,
        )
        .bind(worker_name)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|(host, worker)| PendingMigration {
                host,
                worker: worker.unwrap_or_else(|| "unbound".to_string()),
            })
            .collect())
    }
}
