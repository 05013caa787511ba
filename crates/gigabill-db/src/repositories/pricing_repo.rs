//! Pricing repository implementation
//!
//! Stores the per-service price cards. The charge workflow falls back to
//! built-in defaults when a service has no active row here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigabill_core::{
    models::{Pricing, ServiceType},
    traits::{PricingRepository, Repository},
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of PricingRepository
pub struct PgPricingRepository {
    pool: PgPool,
}

impl PgPricingRepository {
    /// Create a new pricing repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse service type from string
    fn parse_service(s: &str) -> ServiceType {
        ServiceType::from_str(s).unwrap_or(ServiceType::Torrent)
    }
}

const PRICING_SELECT_COLUMNS: &str = r#"
    id, service_type, display_name, price_per_unit, unit_size_gb,
    description, is_active, created_at, updated_at
"#;

#[async_trait]
impl Repository<Pricing, i64> for PgPricingRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Pricing>> {
        let query = format!("SELECT {} FROM pricing WHERE id = $1", PRICING_SELECT_COLUMNS);

        let result = sqlx::query_as::<sqlx::Postgres, PricingRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding pricing {}: {}", id, e);
                AppError::Database(format!("Failed to find pricing: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Pricing>> {
        let query = format!(
            "SELECT {} FROM pricing ORDER BY id LIMIT $1 OFFSET $2",
            PRICING_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, PricingRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding pricing rows: {}", e);
                AppError::Database(format!("Failed to fetch pricing: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pricing")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting pricing rows: {}", e);
                AppError::Database(format!("Failed to count pricing: {}", e))
            })?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &Pricing) -> AppResult<Pricing> {
        debug!("Creating pricing for service: {}", entity.service_type);

        let query = format!(
            r#"
            INSERT INTO pricing (
                service_type, display_name, price_per_unit, unit_size_gb,
                description, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PRICING_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PricingRow>(&query)
            .bind(entity.service_type.to_string())
            .bind(&entity.display_name)
            .bind(entity.price_per_unit)
            .bind(entity.unit_size_gb)
            .bind(&entity.description)
            .bind(entity.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error creating pricing: {}", e);
                if e.to_string().contains("unique constraint") {
                    AppError::AlreadyExists(format!(
                        "Pricing for {} already exists",
                        entity.service_type
                    ))
                } else {
                    AppError::Database(format!("Failed to create pricing: {}", e))
                }
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &Pricing) -> AppResult<Pricing> {
        debug!("Updating pricing: {}", entity.id);

        let query = format!(
            r#"
            UPDATE pricing
            SET display_name = $2,
                price_per_unit = $3,
                unit_size_gb = $4,
                description = $5,
                is_active = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PRICING_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PricingRow>(&query)
            .bind(entity.id)
            .bind(&entity.display_name)
            .bind(entity.price_per_unit)
            .bind(entity.unit_size_gb)
            .bind(&entity.description)
            .bind(entity.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error updating pricing {}: {}", entity.id, e);
                AppError::Database(format!("Failed to update pricing: {}", e))
            })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM pricing WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error deleting pricing {}: {}", id, e);
                AppError::Database(format!("Failed to delete pricing: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PricingRepository for PgPricingRepository {
    #[instrument(skip(self))]
    async fn find_by_service(&self, service: ServiceType) -> AppResult<Option<Pricing>> {
        debug!("Finding active pricing for service: {}", service);

        let query = format!(
            "SELECT {} FROM pricing WHERE service_type = $1 AND is_active = TRUE",
            PRICING_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, PricingRow>(&query)
            .bind(service.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding pricing for {}: {}", service, e);
                AppError::Database(format!("Failed to find pricing: {}", e))
            })?;

        Ok(result.map(Into::into))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PricingRow {
    id: i64,
    service_type: String,
    display_name: String,
    price_per_unit: i64,
    unit_size_gb: i64,
    description: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PricingRow> for Pricing {
    fn from(row: PricingRow) -> Self {
        Self {
            id: row.id,
            service_type: PgPricingRepository::parse_service(&row.service_type),
            display_name: row.display_name,
            price_per_unit: row.price_per_unit,
            unit_size_gb: row.unit_size_gb,
            description: row.description,
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
    fn test_pricing_row_conversion() {
        let now = Utc::now();
        let row = PricingRow {
            id: 2,
            service_type: "premium".to_string(),
            display_name: "Premium Host".to_string(),
            price_per_unit: 2000,
            unit_size_gb: 2,
            description: "Rp 2.000/2GB".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let pricing: Pricing = row.into();
        assert_eq!(pricing.service_type, ServiceType::Premium);
        assert_eq!(pricing.price_per_unit, 2000);
        assert_eq!(pricing.unit_size_gb, 2);
    }
}
