//! # User Repository
//!
//! PostgreSQL access for platform users and their host authorizations.
//! Users are related to hosts through the `user_hosts` join table.

use shared::errors::ApiError;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::entities::User;

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, display_name, is_active, config_version, created_at, updated_at";

// =============================================================================
// USER REPOSITORY
// =============================================================================

/// Repository for user rows and the user↔host authorization set.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a user by primary key.
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ApiError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Finds an active user by username. Inactive users are invisible to
    /// every authentication flow.
    #[instrument(skip(self), fields(username = %username))]
    pub async fn find_active_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND is_active = TRUE"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Finds an active user by email who is authorized on the given host.
    ///
    /// Email comparison is case-insensitive; callers normalize to lowercase
    /// anyway for storage.
    #[instrument(skip(self), fields(host_id = %host_id))]
    pub async fn find_active_by_email_for_host(
        &self,
        email: &str,
        host_id: Uuid,
    ) -> Result<Option<User>, ApiError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS} FROM users u
            WHERE LOWER(u.email) = LOWER($1)
              AND u.is_active = TRUE
              AND EXISTS (
                  SELECT 1 FROM user_hosts uh
                  WHERE uh.user_id = u.id AND uh.host_id = $2
              )
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Finds an active user by username who is authorized on the given host.
    pub async fn find_active_by_username_for_host(
        &self,
        username: &str,
        host_id: Uuid,
    ) -> Result<Option<User>, ApiError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS} FROM users u
            WHERE u.username = $1
              AND u.is_active = TRUE
              AND EXISTS (
                  SELECT 1 FROM user_hosts uh
                  WHERE uh.user_id = u.id AND uh.host_id = $2
              )
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// All active users, ordered by username. Feeds the config snapshot.
    pub async fn list_active(&self) -> Result<Vec<User>, ApiError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = TRUE ORDER BY username"
        );
        sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Creates a user. Duplicate username/email surfaces as 409.
    #[instrument(skip(self), fields(username = %username))]
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<User, ApiError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, display_name)
            VALUES ($1, $2, LOWER($3), $4)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(email)
            .bind(display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation("username or email already in use"))
    }

    /// Adds a user to a host's authorized set. Returns `false` when the
    /// authorization already existed.
    #[instrument(skip(self))]
    pub async fn authorize_on_host(&self, user_id: Uuid, host_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_hosts (user_id, host_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(host_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Count of active users. Used by the health endpoint.
    pub async fn count_active(&self) -> Result<i64, ApiError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::DatabaseError)?;
        Ok(count.0)
    }
}

/// Maps a unique-constraint violation to 409, anything else to 500.
pub(crate) fn map_unique_violation(
    message: &'static str,
) -> impl Fn(sqlx::Error) -> ApiError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::Conflict {
            resource: message.to_string(),
        },
        _ => ApiError::DatabaseError(e),
    }
}
