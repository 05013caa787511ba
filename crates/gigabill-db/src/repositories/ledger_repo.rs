//! Ledger repository implementation
//!
//! Provides PostgreSQL-backed storage for the append-only balance ledger.
//! Entries are inserted inside the owning service transaction; this
//! repository covers lookups and reporting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigabill_core::{
    models::{LedgerEntry, LedgerEntryKind, LedgerOverview},
    traits::LedgerRepository,
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of LedgerRepository
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    /// Create a new ledger repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse entry kind from string
    fn parse_kind(s: &str) -> LedgerEntryKind {
        LedgerEntryKind::from_str(s).unwrap_or(LedgerEntryKind::Adjustment)
    }
}

const LEDGER_SELECT_COLUMNS: &str = r#"
    id, user_id, amount, previous_balance, new_balance,
    kind, description, created_at
"#;

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<LedgerEntry>> {
        let query = format!(
            "SELECT {} FROM ledger_entries WHERE id = $1",
            LEDGER_SELECT_COLUMNS
        );

        let result = sqlx::query_as::<sqlx::Postgres, LedgerRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding ledger entry {}: {}", id, e);
                AppError::Database(format!("Failed to find ledger entry: {}", e))
            })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<LedgerEntry>, i64)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ledger_entries WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error counting user ledger entries: {}", e);
                    AppError::Database(format!("Failed to count ledger entries: {}", e))
                })?;

        let query = format!(
            r#"
            SELECT {} FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            LEDGER_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, LedgerRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching user ledger entries: {}", e);
                AppError::Database(format!("Failed to fetch ledger entries: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }

    #[instrument(skip(self))]
    async fn list_filtered(
        &self,
        kind: Option<LedgerEntryKind>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<LedgerEntry>, i64)> {
        debug!(
            "Listing ledger entries: kind={:?}, limit={}, offset={}",
            kind, limit, offset
        );

        let where_clause = match kind {
            Some(k) => format!("WHERE kind = '{}'", k),
            None => String::new(),
        };

        let count_query = format!("SELECT COUNT(*) FROM ledger_entries {}", where_clause);
        let total: (i64,) = sqlx::query_as(&count_query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error counting filtered ledger entries: {}", e);
                AppError::Database(format!("Failed to count ledger entries: {}", e))
            })?;

        let data_query = format!(
            "SELECT {} FROM ledger_entries {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
            LEDGER_SELECT_COLUMNS, where_clause, limit, offset
        );
        let rows = sqlx::query_as::<sqlx::Postgres, LedgerRow>(&data_query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error fetching filtered ledger entries: {}", e);
                AppError::Database(format!("Failed to fetch ledger entries: {}", e))
            })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }

    #[instrument(skip(self))]
    async fn overview(&self) -> AppResult<LedgerOverview> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM ledger_entries),
                (SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE kind = 'topup'),
                (SELECT COUNT(*) FROM topup_requests WHERE status = 'pending')
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error building ledger overview: {}", e);
            AppError::Database(format!("Failed to build overview: {}", e))
        })?;

        Ok(LedgerOverview {
            users: row.0,
            entries: row.1,
            topup_revenue: row.2,
            pending_topups: row.3,
        })
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    user_id: i64,
    amount: i64,
    previous_balance: i64,
    new_balance: i64,
    kind: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            previous_balance: row.previous_balance,
            new_balance: row.new_balance,
            kind: PgLedgerRepository::parse_kind(&row.kind),
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_row_conversion() {
        let row = LedgerRow {
            id: 1,
            user_id: 7,
            amount: -1300,
            previous_balance: 10_000,
            new_balance: 8700,
            kind: "download".to_string(),
            description: "Torrent/Magnet: debian.iso (2 GB) - Rp 1300".to_string(),
            created_at: Utc::now(),
        };

        let entry: LedgerEntry = row.into();
        assert_eq!(entry.kind, LedgerEntryKind::Download);
        assert!(entry.is_debit());
        assert_eq!(entry.new_balance, 8700);
    }
}
