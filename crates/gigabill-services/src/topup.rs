//! Top-up request lifecycle
//!
//! Creation, payment confirmation, cancellation, lazy expiry, and the
//! admin decision. Every state change locks the request row first, so the
//! one-way state machine holds under concurrent confirms, cancels, and
//! decisions. Approval credits the balance in the same transaction that
//! flips the status; notifications go out only after commit.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use gigabill_core::{
    config::{BillingConfig, TopUpAccounts},
    models::{
        LedgerEntry, LedgerEntryKind, PaymentMethod, TopUpDecision, TopUpDestination,
        TopUpRequest, TopUpStatus,
    },
    traits::{
        AdminAlert, LedgerRepository, Notifier, PaginatedResponse, Pagination, PaginationMeta,
        TopUpRepository,
    },
    AppError, AppResult,
};
use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{SERIAL_ALPHABET, SERIAL_SUFFIX_LEN};
use crate::ledger::BalanceLedger;

const TOPUP_COLUMNS: &str = "id, serial, user_id, username, amount, payment_method, \
     payment_account, status, expires_at, paid_at, cancelled_at, decided_at, admin_reason, \
     created_at, updated_at";

/// Attempts at drawing an unused serial before giving up
const SERIAL_ATTEMPTS: usize = 5;

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
        TopUpRequest {
            id: row.id,
            serial: row.serial,
            user_id: row.user_id,
            username: row.username,
            amount: row.amount,
            payment_method: PaymentMethod::from_str(&row.payment_method)
                .unwrap_or(PaymentMethod::Gopay),
            payment_account: row.payment_account,
            status: TopUpStatus::from_str(&row.status).unwrap_or_default(),
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

/// Top-up service
pub struct TopUpService<T, L, N>
where
    T: TopUpRepository,
    L: LedgerRepository,
    N: Notifier,
{
    pool: Arc<PgPool>,
    topup_repo: Arc<T>,
    ledger: Arc<BalanceLedger<L>>,
    notifier: Arc<N>,
    billing: BillingConfig,
}

impl<T, L, N> TopUpService<T, L, N>
where
    T: TopUpRepository,
    L: LedgerRepository,
    N: Notifier,
{
    /// Create a new top-up service
    pub fn new(
        pool: Arc<PgPool>,
        topup_repo: Arc<T>,
        ledger: Arc<BalanceLedger<L>>,
        notifier: Arc<N>,
        billing: BillingConfig,
    ) -> Self {
        Self {
            pool,
            topup_repo,
            ledger,
            notifier,
            billing,
        }
    }

    /// Destination accounts a user can transfer to
    pub fn destinations(&self) -> Vec<TopUpDestination> {
        destinations_for(&self.billing.topup_accounts)
    }

    /// Open a new top-up request.
    ///
    /// Locks the user row so the one-active-request rule holds under
    /// concurrent creates; lapsed requests expire first so they never
    /// block a new one.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        user_id: i64,
        username: &str,
        amount: i64,
        method: PaymentMethod,
    ) -> AppResult<TopUpRequest> {
        if amount < self.billing.min_topup_amount {
            return Err(AppError::Validation(format!(
                "Minimum top-up amount is Rp {}",
                self.billing.min_topup_amount
            )));
        }

        let now = Utc::now();
        let mut tx = self.begin().await?;

        self.ledger.lock_user(&mut tx, user_id).await?;
        self.expire_for_user_in_tx(&mut tx, user_id, now).await?;

        if let Some(active) = self.find_active_in_tx(&mut tx, user_id).await? {
            debug!(
                "User {} already has active top-up {}",
                user_id, active.serial
            );
            return Err(AppError::ActiveTopUpExists);
        }

        self.check_daily_cap_in_tx(&mut tx, user_id, now).await?;

        let serial = self
            .allocate_serial_in_tx(&mut tx, method, username, now)
            .await?;
        let expires_at = now + Duration::minutes(self.billing.topup_ttl_minutes);
        let account = account_for(&self.billing.topup_accounts, method).to_string();

        let row: TopUpRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO topup_requests (
                serial, user_id, username, amount, payment_method,
                payment_account, status, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            TOPUP_COLUMNS
        ))
        .bind(&serial)
        .bind(user_id)
        .bind(username)
        .bind(amount)
        .bind(method.to_string())
        .bind(&account)
        .bind(TopUpStatus::AwaitingPayment.to_string())
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert top-up request: {}", e);
            AppError::Database(format!("Failed to insert top-up request: {}", e))
        })?;

        self.commit(tx).await?;
        let request = TopUpRequest::from(row);

        info!(
            "Created top-up {} for user {} (Rp {} via {})",
            request.serial, user_id, amount, method
        );

        self.notify(
            user_id,
            &format!(
                "Top-up of Rp {} via {} created. Transfer to {} and confirm before {}.",
                amount,
                method.label(),
                account,
                expires_at.format("%H:%M")
            ),
        )
        .await;

        Ok(request)
    }

    /// Confirm that the user transferred the money.
    ///
    /// Moves the request to pending review and alerts the admins. A lapsed
    /// request is expired on the spot and the confirmation fails.
    #[instrument(skip(self))]
    pub async fn mark_paid(&self, user_id: i64, serial: &str) -> AppResult<TopUpRequest> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let request = self.lock_for_user_in_tx(&mut tx, serial, user_id).await?;
        if request.is_lapsed(now) {
            self.mark_expired_in_tx(&mut tx, request.id).await?;
            self.commit(tx).await?;
            return Err(AppError::Conflict(
                "Top-up request has expired".to_string(),
            ));
        }
        if request.status != TopUpStatus::AwaitingPayment {
            return Err(AppError::Conflict(
                "Top-up request is not awaiting payment".to_string(),
            ));
        }

        let row: TopUpRow = sqlx::query_as(&format!(
            "UPDATE topup_requests SET status = $2, paid_at = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            TOPUP_COLUMNS
        ))
        .bind(request.id)
        .bind(TopUpStatus::Pending.to_string())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to mark top-up {} paid: {}", serial, e);
            AppError::Database(format!("Failed to mark top-up paid: {}", e))
        })?;

        self.commit(tx).await?;
        let updated = TopUpRequest::from(row);

        info!("Top-up {} confirmed paid by user {}", serial, user_id);

        self.notify(
            user_id,
            &format!(
                "Top-up confirmation for Rp {} sent. Status: pending review.",
                updated.amount
            ),
        )
        .await;
        self.alert_admins(AdminAlert {
            title: "Top-up pending review".to_string(),
            body: format!(
                "{} confirmed Rp {} via {}. Serial {}.",
                updated.username,
                updated.amount,
                updated.payment_method.label(),
                updated.serial
            ),
            serial: Some(updated.serial.clone()),
        })
        .await;

        Ok(updated)
    }

    /// Cancel an unpaid request.
    ///
    /// Subject to the same daily failure cap as creation, so a user cannot
    /// churn through requests by cancelling them.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: i64, serial: &str) -> AppResult<TopUpRequest> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let request = self.lock_for_user_in_tx(&mut tx, serial, user_id).await?;
        if request.is_lapsed(now) {
            self.mark_expired_in_tx(&mut tx, request.id).await?;
            self.commit(tx).await?;
            return Err(AppError::Conflict(
                "Top-up request has expired".to_string(),
            ));
        }
        if request.status != TopUpStatus::AwaitingPayment {
            return Err(AppError::Conflict(
                "Only unpaid requests can be cancelled".to_string(),
            ));
        }

        self.check_daily_cap_in_tx(&mut tx, user_id, now).await?;

        let row: TopUpRow = sqlx::query_as(&format!(
            "UPDATE topup_requests SET status = $2, cancelled_at = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            TOPUP_COLUMNS
        ))
        .bind(request.id)
        .bind(TopUpStatus::Cancelled.to_string())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to cancel top-up {}: {}", serial, e);
            AppError::Database(format!("Failed to cancel top-up: {}", e))
        })?;

        self.commit(tx).await?;
        let updated = TopUpRequest::from(row);

        info!("Top-up {} cancelled by user {}", serial, user_id);

        self.notify(
            user_id,
            &format!("Top-up of Rp {} cancelled.", updated.amount),
        )
        .await;

        Ok(updated)
    }

    /// Decide a pending request.
    ///
    /// Approval credits the balance and writes the ledger entry in the
    /// same transaction that flips the status, so a crash can never leave
    /// an approved request without its credit or vice versa. Repeat
    /// decisions bounce off the pending-only guard.
    #[instrument(skip(self))]
    pub async fn decide(
        &self,
        serial: &str,
        decision: TopUpDecision,
        admin_reason: &str,
    ) -> AppResult<TopUpRequest> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let request = self.lock_by_serial_in_tx(&mut tx, serial).await?;
        match request.status {
            TopUpStatus::Pending => {}
            TopUpStatus::AwaitingPayment => {
                return Err(AppError::Conflict(
                    "Top-up request has not been confirmed paid".to_string(),
                ))
            }
            _ => return Err(AppError::AlreadyDecided),
        }

        if decision == TopUpDecision::Approved {
            let (previous_balance, _) = self
                .ledger
                .credit_in_tx(&mut tx, request.user_id, request.amount)
                .await?;
            let entry = LedgerEntry::new(
                request.user_id,
                request.amount,
                previous_balance,
                LedgerEntryKind::TopUp,
                format!("Top Up ({})", request.payment_method),
            );
            self.ledger.record_in_tx(&mut tx, &entry).await?;
        }

        let row: TopUpRow = sqlx::query_as(&format!(
            "UPDATE topup_requests SET status = $2, decided_at = $3, admin_reason = $4, \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            TOPUP_COLUMNS
        ))
        .bind(request.id)
        .bind(decision.target_status().to_string())
        .bind(now)
        .bind(admin_reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to decide top-up {}: {}", serial, e);
            AppError::Database(format!("Failed to decide top-up: {}", e))
        })?;

        self.commit(tx).await?;
        let updated = TopUpRequest::from(row);

        info!(
            "Top-up {} {} (user {}, Rp {})",
            serial, decision, updated.user_id, updated.amount
        );

        let mut message = format!("Top-up of Rp {} {}.", updated.amount, decision);
        if !updated.admin_reason.is_empty() {
            message.push(' ');
            message.push_str(&updated.admin_reason);
        }
        self.notify(updated.user_id, &message).await;

        Ok(updated)
    }

    /// A user's requests, newest first. Lapsed rows expire first so the
    /// listing never shows a stale awaiting_payment.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: i64,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<TopUpRequest>> {
        self.topup_repo.expire_lapsed(Utc::now()).await?;

        let (rows, total) = self
            .topup_repo
            .list_for_user(user_id, pagination.limit(), pagination.offset())
            .await?;

        let clamped = pagination.clamp_to_total(total);
        let (rows, total) = if clamped.page != pagination.page {
            self.topup_repo
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

    /// All requests with an optional status filter, newest first
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        status: Option<TopUpStatus>,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<TopUpRequest>> {
        self.topup_repo.expire_lapsed(Utc::now()).await?;

        let (rows, total) = self
            .topup_repo
            .list_filtered(status, pagination.limit(), pagination.offset())
            .await?;

        let clamped = pagination.clamp_to_total(total);
        let (rows, total) = if clamped.page != pagination.page {
            self.topup_repo
                .list_filtered(status, clamped.limit(), clamped.offset())
                .await?
        } else {
            (rows, total)
        };

        Ok(PaginatedResponse {
            data: rows,
            pagination: PaginationMeta::new(total, clamped),
        })
    }

    /// Requests waiting for a decision, oldest first
    #[instrument(skip(self))]
    pub async fn pending_queue(&self) -> AppResult<Vec<TopUpRequest>> {
        self.topup_repo.expire_lapsed(Utc::now()).await?;
        self.topup_repo.pending_queue().await
    }

    /// One request, scoped to its owner
    #[instrument(skip(self))]
    pub async fn get_for_user(&self, user_id: i64, serial: &str) -> AppResult<TopUpRequest> {
        self.topup_repo
            .find_by_serial(serial)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Top-up request {} not found", serial)))
    }

    /// The user's request still awaiting payment or decision, if any
    #[instrument(skip(self))]
    pub async fn active_for_user(&self, user_id: i64) -> AppResult<Option<TopUpRequest>> {
        self.topup_repo.expire_lapsed(Utc::now()).await?;
        self.topup_repo.find_active_for_user(user_id).await
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(&self, tx: Transaction<'_, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    async fn lock_by_serial_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        serial: &str,
    ) -> AppResult<TopUpRequest> {
        let row: Option<TopUpRow> = sqlx::query_as(&format!(
            "SELECT {} FROM topup_requests WHERE serial = $1 FOR UPDATE",
            TOPUP_COLUMNS
        ))
        .bind(serial)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to lock top-up {}: {}", serial, e);
            AppError::Database(format!("Failed to lock top-up: {}", e))
        })?;

        row.map(TopUpRequest::from)
            .ok_or_else(|| AppError::NotFound(format!("Top-up request {} not found", serial)))
    }

    async fn lock_for_user_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        serial: &str,
        user_id: i64,
    ) -> AppResult<TopUpRequest> {
        let row: Option<TopUpRow> = sqlx::query_as(&format!(
            "SELECT {} FROM topup_requests WHERE serial = $1 AND user_id = $2 FOR UPDATE",
            TOPUP_COLUMNS
        ))
        .bind(serial)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to lock top-up {}: {}", serial, e);
            AppError::Database(format!("Failed to lock top-up: {}", e))
        })?;

        row.map(TopUpRequest::from)
            .ok_or_else(|| AppError::NotFound(format!("Top-up request {} not found", serial)))
    }

    async fn find_active_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> AppResult<Option<TopUpRequest>> {
        let row: Option<TopUpRow> = sqlx::query_as(&format!(
            "SELECT {} FROM topup_requests \
             WHERE user_id = $1 AND status IN ('awaiting_payment', 'pending') \
             ORDER BY created_at DESC LIMIT 1",
            TOPUP_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to check active top-up: {}", e);
            AppError::Database(format!("Failed to check active top-up: {}", e))
        })?;

        Ok(row.map(TopUpRequest::from))
    }

    async fn expire_for_user_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE topup_requests SET status = 'expired', updated_at = NOW() \
             WHERE user_id = $1 AND status = 'awaiting_payment' AND expires_at < $2",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to expire lapsed top-ups: {}", e);
            AppError::Database(format!("Failed to expire lapsed top-ups: {}", e))
        })?;

        Ok(())
    }

    async fn mark_expired_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE topup_requests SET status = 'expired', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to expire top-up {}: {}", id, e);
            AppError::Database(format!("Failed to expire top-up: {}", e))
        })?;

        Ok(())
    }

    /// Enforce the daily failure cap, counting rows this transaction has
    /// already expired.
    async fn check_daily_cap_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let since = utc_day_start(now);
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM topup_requests \
             WHERE user_id = $1 AND status IN ('cancelled', 'expired') AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to count failed top-ups: {}", e);
            AppError::Database(format!("Failed to count failed top-ups: {}", e))
        })?;

        if count >= self.billing.daily_failure_cap {
            return Err(AppError::DailyLimitReached {
                max: self.billing.daily_failure_cap,
            });
        }

        Ok(())
    }

    async fn allocate_serial_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        method: PaymentMethod,
        username: &str,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        for _ in 0..SERIAL_ATTEMPTS {
            let serial = TopUpRequest::build_serial(method, username, now, &random_suffix());
            let taken: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM topup_requests WHERE serial = $1")
                    .bind(&serial)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| {
                        error!("Failed to check serial {}: {}", serial, e);
                        AppError::Database(format!("Failed to check serial: {}", e))
                    })?;

            if taken.is_none() {
                return Ok(serial);
            }
        }

        Err(AppError::Internal(
            "Failed to allocate a unique top-up serial".to_string(),
        ))
    }

    async fn notify(&self, user_id: i64, message: &str) {
        if let Err(e) = self.notifier.notify_user(user_id, message).await {
            warn!("Failed to notify user {}: {}", user_id, e);
        }
    }

    async fn alert_admins(&self, alert: AdminAlert) {
        if let Err(e) = self.notifier.notify_admins(&alert).await {
            warn!("Failed to notify admins: {}", e);
        }
    }
}

/// Destination accounts for every supported method
pub fn destinations_for(accounts: &TopUpAccounts) -> Vec<TopUpDestination> {
    PaymentMethod::ALL
        .iter()
        .map(|&method| TopUpDestination {
            method,
            label: method.label().to_string(),
            account: account_for(accounts, method).to_string(),
        })
        .collect()
}

fn account_for(accounts: &TopUpAccounts, method: PaymentMethod) -> &str {
    match method {
        PaymentMethod::Gopay => &accounts.gopay,
        PaymentMethod::Bri => &accounts.bri,
        PaymentMethod::BankJago => &accounts.bank_jago,
        PaymentMethod::CryptoUsdt => &accounts.crypto_usdt,
    }
}

/// Midnight at the start of the same UTC day
fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SERIAL_SUFFIX_LEN)
        .map(|_| SERIAL_ALPHABET[rng.gen_range(0..SERIAL_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_random_suffix_charset() {
        for _ in 0..100 {
            let suffix = random_suffix();
            assert_eq!(suffix.len(), SERIAL_SUFFIX_LEN);
            assert!(suffix.bytes().all(|b| SERIAL_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_utc_day_start() {
        let at = Utc.with_ymd_and_hms(2026, 2, 12, 14, 5, 33).unwrap();
        let start = utc_day_start(at);

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 12, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_destinations_cover_all_methods() {
        let destinations = destinations_for(&TopUpAccounts::default());

        assert_eq!(destinations.len(), PaymentMethod::ALL.len());
        assert_eq!(destinations[0].method, PaymentMethod::Gopay);
        assert_eq!(destinations[0].label, "GoPay");
        assert_eq!(destinations[0].account, "085700000000");

        let jago = destinations
            .iter()
            .find(|d| d.method == PaymentMethod::BankJago)
            .unwrap();
        assert_eq!(jago.label, "Bank Jago");
    }
}
