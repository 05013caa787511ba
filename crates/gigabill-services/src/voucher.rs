//! Voucher redemption and administration
//!
//! Redemption runs inside the caller's charge transaction with the voucher
//! row locked, so concurrent redemptions of one code serialize and the
//! usage cap cannot be oversubscribed. The read-only preview and the admin
//! CRUD operations go through the repository.

use chrono::{DateTime, Utc};
use gigabill_core::{
    error::VoucherError,
    models::{
        DiscountKind, ServiceType, UsageScope, Voucher, VoucherDraft, VoucherPatch,
        VoucherRedemption, VoucherScope,
    },
    traits::{PaginatedResponse, Pagination, PaginationMeta, Repository, VoucherRepository},
    AppError, AppResult,
};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use validator::Validate;

const VOUCHER_LOCK_SQL: &str = r#"
    SELECT id, code, name, description, discount_kind, discount_value,
           min_order_amount, min_discount_amount, max_discount_amount,
           applies_to, usage_scope, usage_limit, used_count,
           starts_at, ends_at, is_active, created_at, updated_at
    FROM vouchers
    WHERE UPPER(code) = UPPER($1)
    FOR UPDATE
"#;

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
        Voucher {
            id: row.id,
            code: row.code,
            name: row.name,
            description: row.description,
            discount_kind: DiscountKind::from_str(&row.discount_kind).unwrap_or_default(),
            discount_value: row.discount_value,
            min_order_amount: row.min_order_amount,
            min_discount_amount: row.min_discount_amount,
            max_discount_amount: row.max_discount_amount,
            applies_to: VoucherScope::from_str(&row.applies_to).unwrap_or_default(),
            usage_scope: UsageScope::from_str(&row.usage_scope).unwrap_or_default(),
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

/// Voucher service
pub struct VoucherService<R: VoucherRepository> {
    voucher_repo: Arc<R>,
}

impl<R: VoucherRepository> VoucherService<R> {
    /// Create a new voucher service
    pub fn new(voucher_repo: Arc<R>) -> Self {
        Self { voucher_repo }
    }

    /// Redeem a voucher inside the caller's transaction.
    ///
    /// Locks the voucher row, validates redeemability, and commits the
    /// usage (counter increment plus usage row) together with whatever
    /// else the transaction carries. An absent or blank code is not an
    /// error; the base price passes through unchanged.
    #[instrument(skip(self, tx))]
    pub async fn redeem_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        code: Option<&str>,
        service: ServiceType,
        base_price: i64,
        user_id: i64,
    ) -> AppResult<VoucherRedemption> {
        let normalized = match code.map(Voucher::normalize_code) {
            Some(c) if !c.is_empty() => c,
            _ => return Ok(VoucherRedemption::pass_through(base_price)),
        };

        let row: Option<VoucherRow> = sqlx::query_as(VOUCHER_LOCK_SQL)
            .bind(&normalized)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                error!("Failed to lock voucher {}: {}", normalized, e);
                AppError::Database(format!("Failed to lock voucher: {}", e))
            })?;

        let voucher: Voucher = row.ok_or(VoucherError::NotFound)?.into();
        let user_usage = self.usage_in_tx(tx, &voucher, user_id).await?;

        voucher.check_redeemable(service, base_price, user_usage, Utc::now())?;
        let (discount, final_price) = voucher.apply(base_price);

        sqlx::query(
            "UPDATE vouchers SET used_count = used_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(voucher.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to bump voucher usage: {}", e);
            AppError::Database(format!("Failed to bump voucher usage: {}", e))
        })?;

        sqlx::query("INSERT INTO voucher_usages (voucher_id, user_id) VALUES ($1, $2)")
            .bind(voucher.id)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!("Failed to record voucher usage: {}", e);
                AppError::Database(format!("Failed to record voucher usage: {}", e))
            })?;

        debug!(
            "Voucher {} applied for user {}: -{} on {}",
            voucher.code, user_id, discount, base_price
        );

        Ok(VoucherRedemption {
            code: voucher.code,
            discount_amount: discount,
            final_price,
        })
    }

    /// Per-user committed usage, counted inside the transaction.
    ///
    /// Only queried when the cap actually depends on it.
    async fn usage_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        voucher: &Voucher,
        user_id: i64,
    ) -> AppResult<i64> {
        if voucher.usage_scope != UsageScope::PerUser || voucher.usage_limit <= 0 {
            return Ok(0);
        }

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM voucher_usages WHERE voucher_id = $1 AND user_id = $2",
        )
        .bind(voucher.id)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to count voucher usage: {}", e);
            AppError::Database(format!("Failed to count voucher usage: {}", e))
        })?;

        Ok(count)
    }

    /// Validate a code and quote the discount without redeeming anything
    #[instrument(skip(self))]
    pub async fn preview(
        &self,
        code: &str,
        service: ServiceType,
        base_price: i64,
        user_id: i64,
    ) -> AppResult<VoucherRedemption> {
        let normalized = Voucher::normalize_code(code);
        if normalized.is_empty() {
            return Ok(VoucherRedemption::pass_through(base_price));
        }

        let voucher = self
            .voucher_repo
            .find_by_code(&normalized)
            .await?
            .ok_or(VoucherError::NotFound)?;

        let user_usage = if voucher.usage_scope == UsageScope::PerUser && voucher.usage_limit > 0
        {
            self.voucher_repo
                .usage_count_for_user(voucher.id, user_id)
                .await?
        } else {
            0
        };

        voucher.check_redeemable(service, base_price, user_usage, Utc::now())?;
        let (discount, final_price) = voucher.apply(base_price);

        Ok(VoucherRedemption {
            code: voucher.code,
            discount_amount: discount,
            final_price,
        })
    }

    /// Fetch one voucher
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> AppResult<Voucher> {
        self.voucher_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Voucher {} not found", id)))
    }

    /// List vouchers, optionally only the active ones
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        active_only: bool,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Voucher>> {
        let (rows, total) = self
            .voucher_repo
            .list_filtered(active_only, pagination.limit(), pagination.offset())
            .await?;

        let clamped = pagination.clamp_to_total(total);
        let (rows, total) = if clamped.page != pagination.page {
            self.voucher_repo
                .list_filtered(active_only, clamped.limit(), clamped.offset())
                .await?
        } else {
            (rows, total)
        };

        Ok(PaginatedResponse {
            data: rows,
            pagination: PaginationMeta::new(total, clamped),
        })
    }

    /// Create a voucher from an admin draft
    #[instrument(skip(self, draft))]
    pub async fn create(&self, draft: VoucherDraft) -> AppResult<Voucher> {
        draft.validate()?;
        draft.check().map_err(AppError::Validation)?;

        let now = Utc::now();
        let voucher = Voucher {
            id: 0,
            code: Voucher::normalize_code(&draft.code),
            name: draft.name,
            description: draft.description,
            discount_kind: draft.discount_kind,
            discount_value: draft.discount_value,
            min_order_amount: draft.min_order_amount,
            min_discount_amount: draft.min_discount_amount,
            max_discount_amount: draft.max_discount_amount,
            applies_to: draft.applies_to,
            usage_scope: draft.usage_scope,
            usage_limit: draft.usage_limit,
            used_count: 0,
            starts_at: draft.starts_at,
            ends_at: draft.ends_at,
            is_active: draft.is_active,
            created_at: now,
            updated_at: now,
        };

        let created = self.voucher_repo.create(&voucher).await?;
        info!("Created voucher {} (id {})", created.code, created.id);
        Ok(created)
    }

    /// Apply a partial update to a voucher
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: i64, patch: VoucherPatch) -> AppResult<Voucher> {
        let mut voucher = self.get(id).await?;

        if let Some(code) = patch.code {
            voucher.code = Voucher::normalize_code(&code);
        }
        if let Some(name) = patch.name {
            voucher.name = name;
        }
        if let Some(description) = patch.description {
            voucher.description = description;
        }
        if let Some(kind) = patch.discount_kind {
            voucher.discount_kind = kind;
        }
        if let Some(value) = patch.discount_value {
            voucher.discount_value = value;
        }
        if let Some(min_order) = patch.min_order_amount {
            voucher.min_order_amount = min_order;
        }
        if let Some(min_discount) = patch.min_discount_amount {
            voucher.min_discount_amount = min_discount;
        }
        if let Some(max_discount) = patch.max_discount_amount {
            voucher.max_discount_amount = max_discount;
        }
        if let Some(scope) = patch.applies_to {
            voucher.applies_to = scope;
        }
        if let Some(usage_scope) = patch.usage_scope {
            voucher.usage_scope = usage_scope;
        }
        if let Some(limit) = patch.usage_limit {
            voucher.usage_limit = limit;
        }
        if let Some(starts_at) = patch.starts_at {
            voucher.starts_at = starts_at;
        }
        if let Some(ends_at) = patch.ends_at {
            voucher.ends_at = ends_at;
        }
        if let Some(active) = patch.is_active {
            voucher.is_active = active;
        }

        Self::check_voucher(&voucher)?;
        voucher.updated_at = Utc::now();

        let updated = self.voucher_repo.update(&voucher).await?;
        info!("Updated voucher {} (id {})", updated.code, updated.id);
        Ok(updated)
    }

    /// Delete a voucher
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let deleted = self.voucher_repo.delete(id).await?;
        if !deleted {
            return Err(AppError::NotFound(format!("Voucher {} not found", id)));
        }
        info!("Deleted voucher {}", id);
        Ok(())
    }

    /// Invariants a patched voucher must still satisfy
    fn check_voucher(voucher: &Voucher) -> AppResult<()> {
        if voucher.code.is_empty() {
            return Err(AppError::Validation("Voucher code cannot be empty".to_string()));
        }
        if voucher.discount_value < 1 {
            return Err(AppError::Validation(
                "Discount value must be positive".to_string(),
            ));
        }
        if voucher.discount_kind == DiscountKind::Percentage && voucher.discount_value > 100 {
            return Err(AppError::Validation(
                "Percentage discount cannot exceed 100".to_string(),
            ));
        }
        if let (Some(starts_at), Some(ends_at)) = (voucher.starts_at, voucher.ends_at) {
            if ends_at < starts_at {
                return Err(AppError::Validation(
                    "Validity window ends before it starts".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MockVoucherRepository {
        vouchers: Mutex<Vec<Voucher>>,
        usage_counts: Mutex<HashMap<(i64, i64), i64>>,
    }

    impl MockVoucherRepository {
        fn new(vouchers: Vec<Voucher>) -> Self {
            Self {
                vouchers: Mutex::new(vouchers),
                usage_counts: Mutex::new(HashMap::new()),
            }
        }

        fn with_usage(self, voucher_id: i64, user_id: i64, count: i64) -> Self {
            self.usage_counts
                .lock()
                .insert((voucher_id, user_id), count);
            self
        }
    }

    #[async_trait]
    impl Repository<Voucher, i64> for MockVoucherRepository {
        async fn find_by_id(&self, id: i64) -> AppResult<Option<Voucher>> {
            Ok(self.vouchers.lock().iter().find(|v| v.id == id).cloned())
        }

        async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Voucher>> {
            Ok(self
                .vouchers
                .lock()
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn count(&self) -> AppResult<i64> {
            Ok(self.vouchers.lock().len() as i64)
        }

        async fn create(&self, entity: &Voucher) -> AppResult<Voucher> {
            let mut vouchers = self.vouchers.lock();
            let mut created = entity.clone();
            created.id = vouchers.len() as i64 + 1;
            vouchers.push(created.clone());
            Ok(created)
        }

        async fn update(&self, entity: &Voucher) -> AppResult<Voucher> {
            let mut vouchers = self.vouchers.lock();
            let slot = vouchers
                .iter_mut()
                .find(|v| v.id == entity.id)
                .ok_or_else(|| AppError::NotFound(format!("Voucher {} not found", entity.id)))?;
            *slot = entity.clone();
            Ok(entity.clone())
        }

        async fn delete(&self, id: i64) -> AppResult<bool> {
            let mut vouchers = self.vouchers.lock();
            let before = vouchers.len();
            vouchers.retain(|v| v.id != id);
            Ok(vouchers.len() < before)
        }
    }

    #[async_trait]
    impl VoucherRepository for MockVoucherRepository {
        async fn find_by_code(&self, code: &str) -> AppResult<Option<Voucher>> {
            Ok(self
                .vouchers
                .lock()
                .iter()
                .find(|v| v.code.eq_ignore_ascii_case(code))
                .cloned())
        }

        async fn usage_count_for_user(&self, voucher_id: i64, user_id: i64) -> AppResult<i64> {
            Ok(self
                .usage_counts
                .lock()
                .get(&(voucher_id, user_id))
                .copied()
                .unwrap_or(0))
        }

        async fn list_filtered(
            &self,
            active_only: bool,
            limit: i64,
            offset: i64,
        ) -> AppResult<(Vec<Voucher>, i64)> {
            let vouchers = self.vouchers.lock();
            let filtered: Vec<Voucher> = vouchers
                .iter()
                .filter(|v| !active_only || v.is_active)
                .cloned()
                .collect();
            let total = filtered.len() as i64;
            let page = filtered
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
            Ok((page, total))
        }
    }

    fn save10() -> Voucher {
        Voucher {
            id: 1,
            code: "SAVE10".to_string(),
            discount_kind: DiscountKind::Percentage,
            discount_value: 10,
            ..Default::default()
        }
    }

    fn service_with(vouchers: Vec<Voucher>) -> VoucherService<MockVoucherRepository> {
        VoucherService::new(Arc::new(MockVoucherRepository::new(vouchers)))
    }

    #[tokio::test]
    async fn test_preview_pass_through_on_empty_code() {
        let service = service_with(vec![save10()]);

        let redemption = service
            .preview("   ", ServiceType::Torrent, 2000, 1)
            .await
            .unwrap();

        assert_eq!(redemption, VoucherRedemption::pass_through(2000));
    }

    #[tokio::test]
    async fn test_preview_quotes_discount() {
        let service = service_with(vec![save10()]);

        let redemption = service
            .preview("save10", ServiceType::Torrent, 20_000, 1)
            .await
            .unwrap();

        assert_eq!(redemption.code, "SAVE10");
        assert_eq!(redemption.discount_amount, 2000);
        assert_eq!(redemption.final_price, 18_000);
    }

    #[tokio::test]
    async fn test_preview_unknown_code() {
        let service = service_with(vec![save10()]);

        let err = service
            .preview("NOPE", ServiceType::Torrent, 2000, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Voucher(VoucherError::NotFound)));
    }

    #[tokio::test]
    async fn test_preview_per_user_limit() {
        let voucher = Voucher {
            usage_scope: UsageScope::PerUser,
            usage_limit: 1,
            ..save10()
        };
        let repo = MockVoucherRepository::new(vec![voucher]).with_usage(1, 7, 1);
        let service = VoucherService::new(Arc::new(repo));

        let err = service
            .preview("SAVE10", ServiceType::Torrent, 2000, 7)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Voucher(VoucherError::LimitReached)
        ));

        // A different user is still under the cap.
        assert!(service
            .preview("SAVE10", ServiceType::Torrent, 2000, 8)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_normalizes_code() {
        let service = service_with(vec![]);
        let draft = VoucherDraft {
            code: " promo5 ".to_string(),
            name: "Promo".to_string(),
            description: String::new(),
            discount_kind: DiscountKind::Fixed,
            discount_value: 500,
            min_order_amount: 0,
            min_discount_amount: 0,
            max_discount_amount: 0,
            applies_to: VoucherScope::All,
            usage_scope: UsageScope::Global,
            usage_limit: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
        };

        let created = service.create(draft).await.unwrap();
        assert_eq!(created.code, "PROMO5");
        assert_eq!(created.used_count, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_percentage() {
        let service = service_with(vec![]);
        let draft = VoucherDraft {
            code: "BIG".to_string(),
            name: String::new(),
            description: String::new(),
            discount_kind: DiscountKind::Percentage,
            discount_value: 150,
            min_order_amount: 0,
            min_discount_amount: 0,
            max_discount_amount: 0,
            applies_to: VoucherScope::All,
            usage_scope: UsageScope::Global,
            usage_limit: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
        };

        let err = service.create(draft).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_patches_fields() {
        let service = service_with(vec![save10()]);
        let patch = VoucherPatch {
            discount_value: Some(25),
            is_active: Some(false),
            ..Default::default()
        };

        let updated = service.update(1, patch).await.unwrap();
        assert_eq!(updated.discount_value, 25);
        assert!(!updated.is_active);
        assert_eq!(updated.code, "SAVE10");
    }

    #[tokio::test]
    async fn test_update_rejects_inverted_window() {
        let service = service_with(vec![save10()]);
        let now = Utc::now();
        let patch = VoucherPatch {
            starts_at: Some(Some(now)),
            ends_at: Some(Some(now - chrono::Duration::hours(1))),
            ..Default::default()
        };

        let err = service.update(1, patch).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_voucher() {
        let service = service_with(vec![]);

        let err = service.delete(9).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
