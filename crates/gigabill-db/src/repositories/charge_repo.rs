//! Charge record repository implementation
//!
//! Charge records are written inside the charge workflow's transaction;
//! this repository covers history lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigabill_core::{
    models::{ChargeRecord, ServiceType},
    traits::ChargeRepository,
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{error, instrument};

/// PostgreSQL implementation of ChargeRepository
pub struct PgChargeRepository {
    pool: PgPool,
}

impl PgChargeRepository {
    /// Create a new charge record repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CHARGE_SELECT_COLUMNS: &str = r#"
    id, user_id, service_type, final_price, original_price,
    discount_amount, voucher_code, external_reference,
    detail_kind, description, created_at
"#;

#[async_trait]
impl ChargeRepository for PgChargeRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<ChargeRecord>> {
        let query = format!(
            "SELECT {} FROM charge_records WHERE id = $1",
            CHARGE_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, ChargeRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding charge record {}: {}", id, e);
                AppError::Database(format!("Failed to find charge record: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<ChargeRecord>, i64)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM charge_records WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error counting charge records: {}", e);
                    AppError::Database(format!("Failed to count charge records: {}", e))
                })?;

        let query = format!(
            r#"
            SELECT {} FROM charge_records
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            CHARGE_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, ChargeRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching charge records: {}", e);
                AppError::Database(format!("Failed to fetch charge records: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ChargeRow {
    id: i64,
    user_id: i64,
    service_type: String,
    final_price: i64,
    original_price: i64,
    discount_amount: i64,
    voucher_code: Option<String>,
    external_reference: String,
    detail_kind: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<ChargeRow> for ChargeRecord {
    fn from(row: ChargeRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            service_type: ServiceType::from_str(&row.service_type)
                .unwrap_or(ServiceType::Torrent),
            final_price: row.final_price,
            original_price: row.original_price,
            discount_amount: row.discount_amount,
            voucher_code: row.voucher_code,
            external_reference: row.external_reference,
            detail_kind: row.detail_kind,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_row_conversion() {
        let row = ChargeRow {
            id: 3,
            user_id: 7,
            service_type: "premium".to_string(),
            final_price: 18_000,
            original_price: 20_000,
            discount_amount: 2000,
            voucher_code: Some("SAVE10".to_string()),
            external_reference: "https://cdn.example/f.bin".to_string(),
            detail_kind: "file".to_string(),
            description: "Premium Host: f.bin (20 GB) - Rp 18000".to_string(),
            created_at: Utc::now(),
        };

        let record: ChargeRecord = row.into();
        assert_eq!(record.service_type, ServiceType::Premium);
        assert_eq!(record.discount_amount, 2000);
        assert_eq!(record.voucher_code.as_deref(), Some("SAVE10"));
    }
}
