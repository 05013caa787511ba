//! Balance ledger service
//!
//! Owns every balance mutation in the system. Other services call the
//! `*_in_tx` primitives from inside their own transactions so that the
//! balance update, its ledger entry, and the caller's records commit or
//! roll back together. Standalone operations (admin adjustments, history,
//! reporting) manage their own transactions here.

use gigabill_core::{
    error::BalanceShortfall,
    models::{LedgerEntry, LedgerEntryKind, LedgerOverview},
    traits::{LedgerRepository, PaginatedResponse, Pagination, PaginationMeta},
    AppError, AppResult,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Target of an admin balance adjustment
#[derive(Debug, Clone, Copy)]
pub enum BalanceAdjustment {
    /// Set the balance to an absolute value
    Set(i64),
    /// Shift the balance by a signed delta
    Delta(i64),
}

/// Balance ledger
///
/// Balances live on the user row; the ledger records every change with
/// the balance before and after, so the history always reconciles.
pub struct BalanceLedger<L: LedgerRepository> {
    pool: Arc<PgPool>,
    ledger_repo: Arc<L>,
}

impl<L: LedgerRepository> BalanceLedger<L> {
    /// Create a new balance ledger
    pub fn new(pool: Arc<PgPool>, ledger_repo: Arc<L>) -> Self {
        Self { pool, ledger_repo }
    }

    /// Resolve the balance an adjustment lands on
    fn target_balance(current: i64, adjustment: BalanceAdjustment) -> AppResult<i64> {
        let target = match adjustment {
            BalanceAdjustment::Set(value) => {
                if value < 0 {
                    return Err(AppError::InvalidInput(
                        "Balance cannot be set below zero".to_string(),
                    ));
                }
                value
            }
            BalanceAdjustment::Delta(delta) => {
                let target = current + delta;
                if target < 0 {
                    return Err(AppError::InsufficientBalance(BalanceShortfall::bare(
                        -delta, current,
                    )));
                }
                target
            }
        };
        Ok(target)
    }

    /// Entry kind recorded for an adjustment of the given delta
    fn adjustment_kind(delta: i64) -> LedgerEntryKind {
        if delta > 0 {
            LedgerEntryKind::TopUp
        } else {
            LedgerEntryKind::Adjustment
        }
    }

    /// Lock the user row and return `(balance, is_active)`.
    ///
    /// The lock is held until the caller's transaction ends, serializing
    /// every balance change for that user.
    pub async fn lock_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> AppResult<(i64, bool)> {
        let row: Option<(i64, bool)> =
            sqlx::query_as("SELECT balance, is_active FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| {
                    error!("Failed to lock user {}: {}", user_id, e);
                    AppError::Database(format!("Failed to lock user: {}", e))
                })?;

        row.ok_or_else(|| AppError::UserNotFound(format!("User {} not found", user_id)))
    }

    /// Subtract `amount` from a user's balance inside the caller's
    /// transaction. Returns `(previous_balance, new_balance)`.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` when the user does not exist
    /// - `Validation` when the user is disabled
    /// - `InsufficientBalance` when the balance cannot cover `amount`
    pub async fn debit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        amount: i64,
    ) -> AppResult<(i64, i64)> {
        let (balance, is_active) = self.lock_user(tx, user_id).await?;

        if !is_active {
            return Err(AppError::Validation(
                "User account is disabled".to_string(),
            ));
        }
        if balance < amount {
            debug!(
                "Insufficient balance for user {}: required {}, have {}",
                user_id, amount, balance
            );
            return Err(AppError::InsufficientBalance(BalanceShortfall::bare(
                amount, balance,
            )));
        }

        let new_balance = balance - amount;
        self.write_balance(tx, user_id, new_balance).await?;

        Ok((balance, new_balance))
    }

    /// Add `amount` to a user's balance inside the caller's transaction.
    /// Returns `(previous_balance, new_balance)`.
    pub async fn credit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        amount: i64,
    ) -> AppResult<(i64, i64)> {
        let (balance, _) = self.lock_user(tx, user_id).await?;

        let new_balance = balance + amount;
        self.write_balance(tx, user_id, new_balance).await?;

        Ok((balance, new_balance))
    }

    /// Append a ledger entry inside the caller's transaction
    pub async fn record_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                user_id, amount, previous_balance, new_balance, kind, description
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(entry.previous_balance)
        .bind(entry.new_balance)
        .bind(entry.kind.to_string())
        .bind(&entry.description)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to record ledger entry: {}", e);
            AppError::Database(format!("Failed to record ledger entry: {}", e))
        })?;

        Ok(())
    }

    async fn write_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        new_balance: i64,
    ) -> AppResult<()> {
        sqlx::query("UPDATE users SET balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(new_balance)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!("Failed to update balance for user {}: {}", user_id, e);
                AppError::Database(format!("Failed to update balance: {}", e))
            })?;

        Ok(())
    }

    /// Set or shift a user's balance as an administrator.
    ///
    /// Records a ledger entry describing the change; a no-op adjustment
    /// (zero delta) writes nothing and returns `None`.
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        user_id: i64,
        adjustment: BalanceAdjustment,
    ) -> AppResult<Option<LedgerEntry>> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let (balance, _) = self.lock_user(&mut tx, user_id).await?;
        let target = Self::target_balance(balance, adjustment)?;
        let delta = target - balance;

        if delta == 0 {
            debug!("Adjustment for user {} is a no-op", user_id);
            return Ok(None);
        }

        self.write_balance(&mut tx, user_id, target).await?;

        let entry = LedgerEntry::new(
            user_id,
            delta,
            balance,
            Self::adjustment_kind(delta),
            format!("Admin set balance: {} -> {}", balance, target),
        );
        self.record_in_tx(&mut tx, &entry).await?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(
            "Adjusted balance for user {}: {} -> {}",
            user_id, balance, target
        );

        Ok(Some(entry))
    }

    /// A user's most recent entries, for dashboard views
    #[instrument(skip(self))]
    pub async fn recent_for_user(&self, user_id: i64) -> AppResult<Vec<LedgerEntry>> {
        let (rows, _) = self
            .ledger_repo
            .list_for_user(user_id, crate::constants::DEFAULT_HISTORY_LIMIT, 0)
            .await?;
        Ok(rows)
    }

    /// A user's ledger history, newest first
    #[instrument(skip(self))]
    pub async fn history_for_user(
        &self,
        user_id: i64,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<LedgerEntry>> {
        let (rows, total) = self
            .ledger_repo
            .list_for_user(user_id, pagination.limit(), pagination.offset())
            .await?;

        let clamped = pagination.clamp_to_total(total);
        let (rows, total) = if clamped.page != pagination.page {
            self.ledger_repo
                .list_for_user(user_id, clamped.limit(), clamped.offset())
                .await?
        } else {
            (rows, total)
        };

        Ok(PaginatedResponse {
            data: rows,
            pagination: PaginationMeta::new(total, clamped),
        })
    }

    /// All ledger entries with an optional kind filter, newest first
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        kind: Option<LedgerEntryKind>,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<LedgerEntry>> {
        let (rows, total) = self
            .ledger_repo
            .list_filtered(kind, pagination.limit(), pagination.offset())
            .await?;

        let clamped = pagination.clamp_to_total(total);
        let (rows, total) = if clamped.page != pagination.page {
            self.ledger_repo
                .list_filtered(kind, clamped.limit(), clamped.offset())
                .await?
        } else {
            (rows, total)
        };

        Ok(PaginatedResponse {
            data: rows,
            pagination: PaginationMeta::new(total, clamped),
        })
    }

    /// Aggregate counters for the admin dashboard
    #[instrument(skip(self))]
    pub async fn overview(&self) -> AppResult<LedgerOverview> {
        self.ledger_repo.overview().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Concrete type parameter for calling the associated functions.
    struct NoopLedgerRepo;

    #[async_trait::async_trait]
    impl LedgerRepository for NoopLedgerRepo {
        async fn find_by_id(&self, _id: i64) -> AppResult<Option<LedgerEntry>> {
            Ok(None)
        }

        async fn list_for_user(
            &self,
            _user_id: i64,
            _limit: i64,
            _offset: i64,
        ) -> AppResult<(Vec<LedgerEntry>, i64)> {
            Ok((vec![], 0))
        }

        async fn list_filtered(
            &self,
            _kind: Option<LedgerEntryKind>,
            _limit: i64,
            _offset: i64,
        ) -> AppResult<(Vec<LedgerEntry>, i64)> {
            Ok((vec![], 0))
        }

        async fn overview(&self) -> AppResult<LedgerOverview> {
            Ok(LedgerOverview {
                users: 0,
                entries: 0,
                topup_revenue: 0,
                pending_topups: 0,
            })
        }
    }

    type TestLedger = BalanceLedger<NoopLedgerRepo>;

    #[test]
    fn test_target_balance_set() {
        assert_eq!(
            TestLedger::target_balance(1000, BalanceAdjustment::Set(2500)).unwrap(),
            2500
        );
        assert_eq!(
            TestLedger::target_balance(1000, BalanceAdjustment::Set(0)).unwrap(),
            0
        );
        assert!(TestLedger::target_balance(1000, BalanceAdjustment::Set(-1)).is_err());
    }

    #[test]
    fn test_target_balance_delta() {
        assert_eq!(
            TestLedger::target_balance(1000, BalanceAdjustment::Delta(-400)).unwrap(),
            600
        );
        assert_eq!(
            TestLedger::target_balance(1000, BalanceAdjustment::Delta(400)).unwrap(),
            1400
        );

        let err = TestLedger::target_balance(1000, BalanceAdjustment::Delta(-1001)).unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance(_)));
    }

    #[test]
    fn test_adjustment_kind_follows_delta() {
        assert_eq!(TestLedger::adjustment_kind(500), LedgerEntryKind::TopUp);
        assert_eq!(
            TestLedger::adjustment_kind(-500),
            LedgerEntryKind::Adjustment
        );
    }
}
