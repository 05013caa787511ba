//! Charge workflow
//!
//! One transaction covers the whole charge: voucher redemption, balance
//! debit, the fulfilment action, the charge record, and the ledger entry.
//! If the action fails after the debit, the transaction rolls back and the
//! user keeps their money. Actions that hit a slot-limited upstream pass
//! the admission gate first and hold their permit until the action returns.

use gigabill_core::{
    error::BalanceShortfall,
    models::{
        ChargeCommand, ChargeReceipt, ChargeRecord, LedgerEntry, LedgerEntryKind, Pricing,
        ServiceType, VoucherRedemption,
    },
    traits::{
        ChargeRepository, FulfilAction, LedgerRepository, PaginatedResponse, Pagination,
        PaginationMeta, PricingRepository, VoucherRepository,
    },
    AppError, AppResult,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::gate::AdmissionGate;
use crate::ledger::BalanceLedger;
use crate::voucher::VoucherService;

/// Charge service
///
/// Generic over the repositories so tests can substitute mocks for the
/// read paths; the write path runs raw statements on its own transaction.
pub struct ChargeService<P, V, L, C>
where
    P: PricingRepository,
    V: VoucherRepository,
    L: LedgerRepository,
    C: ChargeRepository,
{
    pool: Arc<PgPool>,
    pricing_repo: Arc<P>,
    charge_repo: Arc<C>,
    vouchers: Arc<VoucherService<V>>,
    ledger: Arc<BalanceLedger<L>>,
    gate: Arc<AdmissionGate>,
}

impl<P, V, L, C> ChargeService<P, V, L, C>
where
    P: PricingRepository,
    V: VoucherRepository,
    L: LedgerRepository,
    C: ChargeRepository,
{
    /// Create a new charge service
    pub fn new(
        pool: Arc<PgPool>,
        pricing_repo: Arc<P>,
        charge_repo: Arc<C>,
        vouchers: Arc<VoucherService<V>>,
        ledger: Arc<BalanceLedger<L>>,
        gate: Arc<AdmissionGate>,
    ) -> Self {
        Self {
            pool,
            pricing_repo,
            charge_repo,
            vouchers,
            ledger,
            gate,
        }
    }

    /// Pricing for a service, falling back to the compiled defaults
    pub async fn pricing_for(&self, service: ServiceType) -> AppResult<Pricing> {
        Ok(self
            .pricing_repo
            .find_by_service(service)
            .await?
            .unwrap_or_else(|| Pricing::default_for(service)))
    }

    /// Charge a user for one metered action.
    ///
    /// Prices the request, redeems the voucher (if any), debits the
    /// balance, runs `fulfil`, and records the charge and its ledger entry.
    /// All of it commits together or not at all.
    #[instrument(skip(self, fulfil), fields(user_id = cmd.user_id, service = %cmd.service))]
    pub async fn charge(
        &self,
        cmd: ChargeCommand,
        fulfil: &dyn FulfilAction,
    ) -> AppResult<ChargeReceipt> {
        let pricing = self.pricing_for(cmd.service).await?;
        let quote = pricing.quote(cmd.size_bytes.unwrap_or(0));

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let redemption = self
            .vouchers
            .redeem_in_tx(
                &mut tx,
                cmd.voucher_code.as_deref(),
                cmd.service,
                quote.price,
                cmd.user_id,
            )
            .await?;

        let (previous_balance, new_balance) = self
            .ledger
            .debit_in_tx(&mut tx, cmd.user_id, redemption.final_price)
            .await
            .map_err(|e| match e {
                AppError::InsufficientBalance(shortfall) => {
                    AppError::InsufficientBalance(BalanceShortfall {
                        required_price: redemption.final_price,
                        current_balance: shortfall.current_balance,
                        original_price: quote.price,
                        discount_amount: redemption.discount_amount,
                        voucher_code: redemption.code.clone(),
                        required_units: quote.charged_units,
                        required_size_gb: quote.charged_size_gb,
                    })
                }
                other => other,
            })?;

        // The action runs while the transaction is open; any failure here
        // drops the transaction and the debit never lands.
        let outcome = if fulfil.gated() {
            let _permit = self.gate.acquire().await?;
            fulfil.execute().await?
        } else {
            fulfil.execute().await?
        };

        let reference = reference_or_fallback(&outcome.reference);
        let description = describe(
            &pricing.display_name,
            &outcome.display_name,
            quote.charged_size_gb,
            redemption.final_price,
            &redemption,
        );

        let receipt = ChargeReceipt {
            final_price: redemption.final_price,
            original_price: quote.price,
            discount_amount: redemption.discount_amount,
            voucher_code: if redemption.code.is_empty() {
                None
            } else {
                Some(redemption.code.clone())
            },
            charged_units: quote.charged_units,
            charged_size_gb: quote.charged_size_gb,
            external_reference: reference,
            new_balance,
            detail: outcome.detail,
        };

        let mut record = ChargeRecord::new(cmd.user_id, cmd.service, &receipt);
        record.description = description.clone();
        self.insert_record_in_tx(&mut tx, &record).await?;

        let entry = LedgerEntry::new(
            cmd.user_id,
            -receipt.final_price,
            previous_balance,
            LedgerEntryKind::Download,
            description,
        );
        self.ledger.record_in_tx(&mut tx, &entry).await?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(
            "Charged user {} Rp {} for {} ({} GB), balance {} -> {}",
            cmd.user_id,
            receipt.final_price,
            cmd.service,
            receipt.charged_size_gb,
            previous_balance,
            new_balance
        );

        Ok(receipt)
    }

    async fn insert_record_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        record: &ChargeRecord,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO charge_records (
                user_id, service_type, final_price, original_price, discount_amount,
                voucher_code, external_reference, detail_kind, description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.user_id)
        .bind(record.service_type.to_string())
        .bind(record.final_price)
        .bind(record.original_price)
        .bind(record.discount_amount)
        .bind(&record.voucher_code)
        .bind(&record.external_reference)
        .bind(&record.detail_kind)
        .bind(&record.description)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to insert charge record: {}", e);
            AppError::Database(format!("Failed to insert charge record: {}", e))
        })?;

        Ok(())
    }

    /// A user's committed charges, newest first
    #[instrument(skip(self))]
    pub async fn history_for_user(
        &self,
        user_id: i64,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<ChargeRecord>> {
        let (rows, total) = self
            .charge_repo
            .list_for_user(user_id, pagination.limit(), pagination.offset())
            .await?;

        let clamped = pagination.clamp_to_total(total);
        let (rows, total) = if clamped.page != pagination.page {
            self.charge_repo
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
}

/// Ledger-style description for a charge
fn describe(
    service_name: &str,
    item_name: &str,
    charged_gb: i64,
    final_price: i64,
    redemption: &VoucherRedemption,
) -> String {
    let mut description = format!(
        "{}: {} ({} GB) - Rp {}",
        service_name, item_name, charged_gb, final_price
    );
    if !redemption.code.is_empty() {
        description.push_str(&format!(
            " (Voucher {} -Rp {})",
            redemption.code, redemption.discount_amount
        ));
    }
    description
}

/// Upstream reference, or a generated one when the payload had none
fn reference_or_fallback(reference: &str) -> String {
    if reference.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_without_voucher() {
        let redemption = VoucherRedemption::pass_through(1300);
        let description = describe("Torrent/Magnet", "ubuntu.iso", 2, 1300, &redemption);
        assert_eq!(description, "Torrent/Magnet: ubuntu.iso (2 GB) - Rp 1300");
    }

    #[test]
    fn test_description_with_voucher() {
        let redemption = VoucherRedemption {
            code: "SAVE10".to_string(),
            discount_amount: 130,
            final_price: 1170,
        };
        let description = describe("Torrent/Magnet", "ubuntu.iso", 2, 1170, &redemption);
        assert_eq!(
            description,
            "Torrent/Magnet: ubuntu.iso (2 GB) - Rp 1170 (Voucher SAVE10 -Rp 130)"
        );
    }

    #[test]
    fn test_reference_fallback() {
        assert_eq!(reference_or_fallback("abc-123"), "abc-123");

        let generated = reference_or_fallback("");
        assert_eq!(generated.len(), 36);
    }
}
