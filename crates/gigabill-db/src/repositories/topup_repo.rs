//! Top-up request repository implementation
//!
//! Provides PostgreSQL-backed storage for top-up requests. Lifecycle
//! transitions that must be race-free (create, mark paid, cancel, decide)
//! run in the top-up service's transactions; this repository covers
//! lookups, listings, and the bulk lazy-expiry sweep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigabill_core::{
    models::{PaymentMethod, TopUpRequest, TopUpStatus},
    traits::{Repository, TopUpRepository},
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of TopUpRepository
pub struct PgTopUpRepository {
    pool: PgPool,
}

impl PgTopUpRepository {
    /// Create a new top-up repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse request status from string
    fn parse_status(s: &str) -> TopUpStatus {
        TopUpStatus::from_str(s).unwrap_or(TopUpStatus::AwaitingPayment)
    }

    /// Parse payment method from string
    fn parse_method(s: &str) -> PaymentMethod {
        PaymentMethod::from_str(s).unwrap_or(PaymentMethod::Gopay)
    }
}

const TOPUP_SELECT_COLUMNS: &str = r#"
    id, serial, user_id, username, amount,
    payment_method, payment_account, status,
    expires_at, paid_at, cancelled_at, decided_at, admin_reason,
    created_at, updated_at
"#;

#[async_trait]
impl Repository<TopUpRequest, i64> for PgTopUpRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<TopUpRequest>> {
        debug!("Finding top-up request by id: {}", id);

        let query = format!(
            "SELECT {} FROM topup_requests WHERE id = $1",
            TOPUP_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding top-up {}: {}", id, e);
                AppError::Database(format!("Failed to find top-up request: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<TopUpRequest>> {
        let query = format!(
            "SELECT {} FROM topup_requests ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            TOPUP_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding top-up requests: {}", e);
                AppError::Database(format!("Failed to fetch top-up requests: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM topup_requests")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting top-up requests: {}", e);
                AppError::Database(format!("Failed to count top-up requests: {}", e))
            })?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &TopUpRequest) -> AppResult<TopUpRequest> {
        debug!("Creating top-up request: {}", entity.serial);

        let query = format!(
            r#"
            INSERT INTO topup_requests (
                serial, user_id, username, amount,
                payment_method, payment_account, status,
                expires_at, admin_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            TOPUP_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(&entity.serial)
            .bind(entity.user_id)
            .bind(&entity.username)
            .bind(entity.amount)
            .bind(entity.payment_method.to_string())
            .bind(&entity.payment_account)
            .bind(entity.status.to_string())
            .bind(entity.expires_at)
            .bind(&entity.admin_reason)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error creating top-up request: {}", e);
                if e.to_string().contains("unique constraint") {
                    AppError::AlreadyExists(format!(
                        "Top-up request {} already exists",
                        entity.serial
                    ))
                } else {
                    AppError::Database(format!("Failed to create top-up request: {}", e))
                }
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &TopUpRequest) -> AppResult<TopUpRequest> {
        debug!("Updating top-up request: {}", entity.id);

        let query = format!(
            r#"
            UPDATE topup_requests
            SET status = $2,
                paid_at = $3,
                cancelled_at = $4,
                decided_at = $5,
                admin_reason = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TOPUP_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(entity.id)
            .bind(entity.status.to_string())
            .bind(entity.paid_at)
            .bind(entity.cancelled_at)
            .bind(entity.decided_at)
            .bind(&entity.admin_reason)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error updating top-up {}: {}", entity.id, e);
                AppError::Database(format!("Failed to update top-up request: {}", e))
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> AppResult<bool> {
        debug!("Deleting top-up request: {}", id);

        let result = sqlx::query("DELETE FROM topup_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error deleting top-up {}: {}", id, e);
                AppError::Database(format!("Failed to delete top-up request: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TopUpRepository for PgTopUpRepository {
    #[instrument(skip(self))]
    async fn find_by_serial(&self, serial: &str) -> AppResult<Option<TopUpRequest>> {
        debug!("Finding top-up request by serial: {}", serial);

        let query = format!(
            "SELECT {} FROM topup_requests WHERE serial = $1",
            TOPUP_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(serial)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding top-up by serial: {}", e);
                AppError::Database(format!("Failed to find top-up request: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_active_for_user(&self, user_id: i64) -> AppResult<Option<TopUpRequest>> {
        debug!("Finding active top-up request for user: {}", user_id);

        let query = format!(
            r#"
            SELECT {} FROM topup_requests
            WHERE user_id = $1 AND status IN ('awaiting_payment', 'pending')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            TOPUP_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding active top-up: {}", e);
                AppError::Database(format!("Failed to find active top-up: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn count_failures_since(&self, user_id: i64, since: DateTime<Utc>) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM topup_requests
            WHERE user_id = $1
              AND status IN ('cancelled', 'expired')
              AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting failed top-ups: {}", e);
            AppError::Database(format!("Failed to count failed top-ups: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn expire_lapsed(&self, now: DateTime<Utc>) -> AppResult<i64> {
        let result = sqlx::query(
            r#"
            UPDATE topup_requests
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'awaiting_payment' AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error expiring lapsed top-ups: {}", e);
            AppError::Database(format!("Failed to expire top-ups: {}", e))
        })?;

        let expired = result.rows_affected() as i64;
        if expired > 0 {
            debug!("Expired {} lapsed top-up requests", expired);
        }

        Ok(expired)
    }

    #[instrument(skip(self))]
    async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<TopUpRequest>, i64)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM topup_requests WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error counting user top-ups: {}", e);
                    AppError::Database(format!("Failed to count top-up requests: {}", e))
                })?;

        let query = format!(
            r#"
            SELECT {} FROM topup_requests
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            TOPUP_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching user top-ups: {}", e);
                AppError::Database(format!("Failed to fetch top-up requests: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }

    #[instrument(skip(self))]
    async fn list_filtered(
        &self,
        status: Option<TopUpStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<TopUpRequest>, i64)> {
        debug!(
            "Listing top-up requests: status={:?}, limit={}, offset={}",
            status, limit, offset
        );

        let where_clause = match status {
            Some(s) => format!("WHERE status = '{}'", s),
            None => String::new(),
        };

        let count_query = format!("SELECT COUNT(*) FROM topup_requests {}", where_clause);
        let total: (i64,) = sqlx::query_as(&count_query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting filtered top-ups: {}", e);
                AppError::Database(format!("Failed to count top-up requests: {}", e))
            })?;

        let data_query = format!(
            "SELECT {} FROM topup_requests {} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            TOPUP_SELECT_COLUMNS, where_clause, limit, offset
        );
        let rows = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&data_query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching filtered top-ups: {}", e);
                AppError::Database(format!("Failed to fetch top-up requests: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }

    #[instrument(skip(self))]
    async fn pending_queue(&self) -> AppResult<Vec<TopUpRequest>> {
        let query = format!(
            r#"
            SELECT {} FROM topup_requests
            WHERE status = 'pending'
            ORDER BY paid_at ASC
            "#,
            TOPUP_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, TopUpRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching pending queue: {}", e);
                AppError::Database(format!("Failed to fetch pending top-ups: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct TopUpRow {
    id: i64,
    serial: String,
    user_id: i64,
    username: String,
    amount: i64,
    payment_method: String,
    payment_account: String,
    status: String,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    decided_at: Option<DateTime<Utc>>,
    admin_reason: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TopUpRow> for TopUpRequest {
    fn from(row: TopUpRow) -> Self {
        Self {
            id: row.id,
            serial: row.serial,
            user_id: row.user_id,
            username: row.username,
            amount: row.amount,
            payment_method: PgTopUpRepository::parse_method(&row.payment_method),
            payment_account: row.payment_account,
            status: PgTopUpRepository::parse_status(&row.status),
            expires_at: row.expires_at,
            paid_at: row.paid_at,
            cancelled_at: row.cancelled_at,
            decided_at: row.decided_at,
            admin_reason: row.admin_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topup_row_conversion() {
        let now = Utc::now();
        let row = TopUpRow {
            id: 1,
            serial: "GOP12022614NAR9L1".to_string(),
            user_id: 7,
            username: "narto".to_string(),
            amount: 10_000,
            payment_method: "gopay".to_string(),
            payment_account: "085700000000".to_string(),
            status: "awaiting_payment".to_string(),
            expires_at: now + chrono::Duration::minutes(30),
            paid_at: None,
            cancelled_at: None,
            decided_at: None,
            admin_reason: String::new(),
            created_at: now,
            updated_at: now,
        };

        let request: TopUpRequest = row.into();
        assert_eq!(request.serial, "GOP12022614NAR9L1");
        assert_eq!(request.payment_method, PaymentMethod::Gopay);
        assert_eq!(request.status, TopUpStatus::AwaitingPayment);
        assert!(request.status.is_active());
    }
}
