//! Voucher repository implementation
//!
//! Provides PostgreSQL-backed storage for vouchers and their usage rows.
//! Redemption itself runs inside the voucher service's transaction; this
//! repository covers lookups and admin CRUD.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigabill_core::{
    models::{DiscountKind, UsageScope, Voucher, VoucherScope},
    traits::{Repository, VoucherRepository},
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of VoucherRepository
pub struct PgVoucherRepository {
    pool: PgPool,
}

impl PgVoucherRepository {
    /// Create a new voucher repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse discount kind from string
    fn parse_kind(s: &str) -> DiscountKind {
        DiscountKind::from_str(s).unwrap_or(DiscountKind::Percentage)
    }

    /// Parse voucher scope from string
    fn parse_scope(s: &str) -> VoucherScope {
        VoucherScope::from_str(s).unwrap_or(VoucherScope::All)
    }

    /// Parse usage scope from string
    fn parse_usage_scope(s: &str) -> UsageScope {
        UsageScope::from_str(s).unwrap_or(UsageScope::Global)
    }
}

const VOUCHER_SELECT_COLUMNS: &str = r#"
    id, code, name, description,
    discount_kind, discount_value,
    min_order_amount, min_discount_amount, max_discount_amount,
    applies_to, usage_scope, usage_limit, used_count,
    starts_at, ends_at, is_active,
    created_at, updated_at
"#;

#[async_trait]
impl Repository<Voucher, i64> for PgVoucherRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Voucher>> {
        let query = format!(
            "SELECT {} FROM vouchers WHERE id = $1",
            VOUCHER_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, VoucherRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding voucher {}: {}", id, e);
                AppError::Database(format!("Failed to find voucher: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Voucher>> {
        let query = format!(
            "SELECT {} FROM vouchers ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            VOUCHER_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, VoucherRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding vouchers: {}", e);
                AppError::Database(format!("Failed to fetch vouchers: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vouchers")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting vouchers: {}", e);
                AppError::Database(format!("Failed to count vouchers: {}", e))
            })?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &Voucher) -> AppResult<Voucher> {
        debug!("Creating voucher: {}", entity.code);

        let query = format!(
            r#"
            INSERT INTO vouchers (
                code, name, description,
                discount_kind, discount_value,
                min_order_amount, min_discount_amount, max_discount_amount,
                applies_to, usage_scope, usage_limit, used_count,
                starts_at, ends_at, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            VOUCHER_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, VoucherRow>(&query)
            .bind(&entity.code)
            .bind(&entity.name)
            .bind(&entity.description)
            .bind(entity.discount_kind.to_string())
            .bind(entity.discount_value)
            .bind(entity.min_order_amount)
            .bind(entity.min_discount_amount)
            .bind(entity.max_discount_amount)
            .bind(entity.applies_to.to_string())
            .bind(entity.usage_scope.to_string())
            .bind(entity.usage_limit)
            .bind(entity.used_count)
            .bind(entity.starts_at)
            .bind(entity.ends_at)
            .bind(entity.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error creating voucher: {}", e);
                if e.to_string().contains("unique constraint") {
                    AppError::AlreadyExists(format!("Voucher {} already exists", entity.code))
                } else {
                    AppError::Database(format!("Failed to create voucher: {}", e))
                }
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &Voucher) -> AppResult<Voucher> {
        debug!("Updating voucher: {}", entity.id);

        let query = format!(
            r#"
            UPDATE vouchers
            SET name = $2,
                description = $3,
                discount_kind = $4,
                discount_value = $5,
                min_order_amount = $6,
                min_discount_amount = $7,
                max_discount_amount = $8,
                applies_to = $9,
                usage_scope = $10,
                usage_limit = $11,
                starts_at = $12,
                ends_at = $13,
                is_active = $14,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            VOUCHER_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, VoucherRow>(&query)
            .bind(entity.id)
            .bind(&entity.name)
            .bind(&entity.description)
            .bind(entity.discount_kind.to_string())
            .bind(entity.discount_value)
            .bind(entity.min_order_amount)
            .bind(entity.min_discount_amount)
            .bind(entity.max_discount_amount)
            .bind(entity.applies_to.to_string())
            .bind(entity.usage_scope.to_string())
            .bind(entity.usage_limit)
            .bind(entity.starts_at)
            .bind(entity.ends_at)
            .bind(entity.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error updating voucher {}: {}", entity.id, e);
                AppError::Database(format!("Failed to update voucher: {}", e))
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> AppResult<bool> {
        debug!("Deleting voucher: {}", id);

        let result = sqlx::query("DELETE FROM vouchers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error deleting voucher {}: {}", id, e);
                AppError::Database(format!("Failed to delete voucher: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VoucherRepository for PgVoucherRepository {
    #[instrument(skip(self))]
    async fn find_by_code(&self, code: &str) -> AppResult<Option<Voucher>> {
        debug!("Finding voucher by code: {}", code);

        let query = format!(
            "SELECT {} FROM vouchers WHERE UPPER(code) = UPPER($1)",
            VOUCHER_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, VoucherRow>(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding voucher by code: {}", e);
                AppError::Database(format!("Failed to find voucher: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn usage_count_for_user(&self, voucher_id: i64, user_id: i64) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM voucher_usages WHERE voucher_id = $1 AND user_id = $2",
        )
        .bind(voucher_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting voucher usage: {}", e);
            AppError::Database(format!("Failed to count voucher usage: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn list_filtered(
        &self,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Voucher>, i64)> {
        debug!(
            "Listing vouchers: active_only={}, limit={}, offset={}",
            active_only, limit, offset
        );

        let where_clause = if active_only {
            "WHERE is_active = TRUE"
        } else {
            ""
        };

        let count_query = format!("SELECT COUNT(*) FROM vouchers {}", where_clause);
        let total: (i64,) = sqlx::query_as(&count_query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting filtered vouchers: {}", e);
                AppError::Database(format!("Failed to count vouchers: {}", e))
            })?;

        let data_query = format!(
            "SELECT {} FROM vouchers {} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            VOUCHER_SELECT_COLUMNS, where_clause, limit, offset
        );
        let rows = sqlx::query_as::<sqlx::Postgres, VoucherRow>(&data_query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching filtered vouchers: {}", e);
                AppError::Database(format!("Failed to fetch vouchers: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct VoucherRow {
    id: i64,
    code: String,
    name: String,
    description: String,
    discount_kind: String,
    discount_value: i64,
    min_order_amount: i64,
    min_discount_amount: i64,
    max_discount_amount: i64,
    applies_to: String,
    usage_scope: String,
    usage_limit: i64,
    used_count: i64,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            name: row.name,
            description: row.description,
            discount_kind: PgVoucherRepository::parse_kind(&row.discount_kind),
            discount_value: row.discount_value,
            min_order_amount: row.min_order_amount,
            min_discount_amount: row.min_discount_amount,
            max_discount_amount: row.max_discount_amount,
            applies_to: PgVoucherRepository::parse_scope(&row.applies_to),
            usage_scope: PgVoucherRepository::parse_usage_scope(&row.usage_scope),
            usage_limit: row.usage_limit,
            used_count: row.used_count,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voucher_row_conversion() {
        let now = Utc::now();
        let row = VoucherRow {
            id: 1,
            code: "SAVE10".to_string(),
            name: "Save 10%".to_string(),
            description: String::new(),
            discount_kind: "percentage".to_string(),
            discount_value: 10,
            min_order_amount: 0,
            min_discount_amount: 0,
            max_discount_amount: 5000,
            applies_to: "all".to_string(),
            usage_scope: "per_user".to_string(),
            usage_limit: 1,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let voucher: Voucher = row.into();
        assert_eq!(voucher.code, "SAVE10");
        assert_eq!(voucher.discount_kind, DiscountKind::Percentage);
        assert_eq!(voucher.usage_scope, UsageScope::PerUser);
        assert_eq!(voucher.max_discount_amount, 5000);
    }

    #[test]
    fn test_unknown_enum_strings_fall_back() {
        assert_eq!(
            PgVoucherRepository::parse_kind("bogus"),
            DiscountKind::Percentage
        );
        assert_eq!(PgVoucherRepository::parse_scope("bogus"), VoucherScope::All);
        assert_eq!(
            PgVoucherRepository::parse_usage_scope("bogus"),
            UsageScope::Global
        );
    }
}
