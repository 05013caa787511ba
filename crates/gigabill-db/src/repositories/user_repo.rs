//! User repository implementation
//!
//! Provides PostgreSQL-backed storage for user accounts. Balance changes
//! never go through this repository; they belong to the ledger service,
//! which performs them inside transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigabill_core::{
    models::User,
    traits::{Repository, UserRepository},
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of UserRepository
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_SELECT_COLUMNS: &str = r#"
    id, email, display_name, balance, is_active,
    created_at, updated_at
"#;

#[async_trait]
impl Repository<User, i64> for PgUserRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        debug!("Finding user by id: {}", id);

        let query = format!("SELECT {} FROM users WHERE id = $1", USER_SELECT_COLUMNS);

        let result = sqlx::query_as::<sqlx::Postgres, UserRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding user {}: {}", id, e);
                AppError::Database(format!("Failed to find user: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<User>> {
        let query = format!(
            "SELECT {} FROM users ORDER BY id LIMIT $1 OFFSET $2",
            USER_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, UserRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding users: {}", e);
                AppError::Database(format!("Failed to fetch users: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting users: {}", e);
                AppError::Database(format!("Failed to count users: {}", e))
            })?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &User) -> AppResult<User> {
        debug!("Creating user: {}", entity.email);

        let query = format!(
            r#"
            INSERT INTO users (email, display_name, balance, is_active)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            USER_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, UserRow>(&query)
            .bind(&entity.email)
            .bind(&entity.display_name)
            .bind(entity.balance)
            .bind(entity.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error creating user: {}", e);
                if e.to_string().contains("unique constraint") {
                    AppError::AlreadyExists(format!("User {} already exists", entity.email))
                } else {
                    AppError::Database(format!("Failed to create user: {}", e))
                }
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &User) -> AppResult<User> {
        debug!("Updating user: {}", entity.id);

        let query = format!(
            r#"
            UPDATE users
            SET email = $2,
                display_name = $3,
                is_active = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, UserRow>(&query)
            .bind(entity.id)
            .bind(&entity.email)
            .bind(&entity.display_name)
            .bind(entity.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error updating user {}: {}", entity.id, e);
                AppError::Database(format!("Failed to update user: {}", e))
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> AppResult<bool> {
        debug!("Deleting user: {}", id);

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error deleting user {}: {}", id, e);
                AppError::Database(format!("Failed to delete user: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        debug!("Finding user by email: {}", email);

        let query = format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, UserRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding user by email: {}", e);
                AppError::Database(format!("Failed to find user: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: i64, active: bool) -> AppResult<()> {
        debug!("Setting user {} active={}", id, active);

        let result = sqlx::query(
            "UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating user {} status: {}", id, e);
            AppError::Database(format!("Failed to update user status: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::UserNotFound(format!("User {} not found", id)));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_filtered(
        &self,
        active: Option<bool>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<User>, i64)> {
        debug!(
            "Listing users with filters: active={:?}, search={:?}, limit={}, offset={}",
            active, search, limit, offset
        );

        let mut where_clause = String::from("WHERE 1=1");
        if let Some(a) = active {
            where_clause.push_str(&format!(" AND is_active = {}", a));
        }
        if search.is_some() {
            where_clause.push_str(" AND (email ILIKE $1 OR display_name ILIKE $1)");
        }
        let pattern = search.map(|s| format!("%{}%", s));

        let count_query = format!("SELECT COUNT(*) FROM users {}", where_clause);
        let mut count = sqlx::query_as::<sqlx::Postgres, (i64,)>(&count_query);
        if let Some(p) = &pattern {
            count = count.bind(p);
        }
        let total = count.fetch_one(&self.pool).await.map_err(|e| {
            error!("Database error counting filtered users: {}", e);
            AppError::Database(format!("Failed to count users: {}", e))
        })?;

        let data_query = format!(
            "SELECT {} FROM users {} ORDER BY id LIMIT {} OFFSET {}",
            USER_SELECT_COLUMNS, where_clause, limit, offset
        );
        let mut data = sqlx::query_as::<sqlx::Postgres, UserRow>(&data_query);
        if let Some(p) = &pattern {
            data = data.bind(p);
        }
        let rows = data.fetch_all(&self.pool).await.map_err(|e| {
            error!("Database error fetching filtered users: {}", e);
            AppError::Database(format!("Failed to fetch users: {}", e))
        })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    display_name: Option<String>,
    balance: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            balance: row.balance,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
