//! Voucher models and discount rules
//!
//! A voucher discounts the base price of a metered action. Redemption is
//! serialized per code; usage history is append-only. The checks and the
//! discount math here are pure so the engine and the read-only preview share
//! one implementation.

use crate::error::VoucherError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::pricing::ServiceType;

/// Discount kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    /// Percentage of the base price
    #[default]
    Percentage,
    /// Flat amount
    Fixed,
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountKind::Percentage => write!(f, "percentage"),
            DiscountKind::Fixed => write!(f, "fixed"),
        }
    }
}

impl DiscountKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "percentage" => Some(DiscountKind::Percentage),
            "fixed" => Some(DiscountKind::Fixed),
            _ => None,
        }
    }
}

/// Which services a voucher applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoucherScope {
    #[default]
    All,
    Torrent,
    Premium,
}

impl fmt::Display for VoucherScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoucherScope::All => write!(f, "all"),
            VoucherScope::Torrent => write!(f, "torrent"),
            VoucherScope::Premium => write!(f, "premium"),
        }
    }
}

impl VoucherScope {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(VoucherScope::All),
            "torrent" => Some(VoucherScope::Torrent),
            "premium" => Some(VoucherScope::Premium),
            _ => None,
        }
    }

    /// Check whether the scope covers a service
    pub fn covers(&self, service: ServiceType) -> bool {
        match self {
            VoucherScope::All => true,
            VoucherScope::Torrent => service == ServiceType::Torrent,
            VoucherScope::Premium => service == ServiceType::Premium,
        }
    }
}

/// Whether the usage cap counts redemptions globally or per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageScope {
    #[default]
    Global,
    PerUser,
}

impl fmt::Display for UsageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageScope::Global => write!(f, "global"),
            UsageScope::PerUser => write!(f, "per_user"),
        }
    }
}

impl UsageScope {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "global" => Some(UsageScope::Global),
            "per_user" => Some(UsageScope::PerUser),
            _ => None,
        }
    }
}

/// Voucher entity
///
/// `code` is stored uppercase and matched case-insensitively. `used_count`
/// only ever moves forward, one increment per committed redemption, and
/// always equals the number of usage rows for the voucher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    /// Unique identifier
    pub id: i64,

    /// Redemption code (unique, uppercase)
    pub code: String,

    /// Display name
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Discount kind
    pub discount_kind: DiscountKind,

    /// Percentage (0-100) or flat amount depending on kind
    pub discount_value: i64,

    /// Minimum base price required to redeem (0 = none)
    pub min_order_amount: i64,

    /// Discount floor (0 = none)
    pub min_discount_amount: i64,

    /// Discount cap (0 = uncapped)
    pub max_discount_amount: i64,

    /// Services the voucher applies to
    pub applies_to: VoucherScope,

    /// How the usage cap is tracked
    pub usage_scope: UsageScope,

    /// Redemption cap for the usage scope (0 = unlimited)
    pub usage_limit: i64,

    /// Committed redemptions so far
    pub used_count: i64,

    /// Validity window start (None = immediately valid)
    pub starts_at: Option<DateTime<Utc>>,

    /// Validity window end (None = never expires)
    pub ends_at: Option<DateTime<Utc>>,

    /// Whether the voucher can currently be redeemed
    pub is_active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Voucher {
    /// Canonical form of a user-supplied code
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Validate redeemability, short-circuiting on the first failure.
    ///
    /// `user_usage` is the caller's committed redemption count for this
    /// voucher; it only matters for the per-user scope. Pure: the caller
    /// holds whatever lease the context requires.
    pub fn check_redeemable(
        &self,
        service: ServiceType,
        base_price: i64,
        user_usage: i64,
        now: DateTime<Utc>,
    ) -> Result<(), VoucherError> {
        if !self.is_active {
            return Err(VoucherError::Inactive);
        }
        if !self.applies_to.covers(service) {
            return Err(VoucherError::NotApplicable);
        }
        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return Err(VoucherError::NotStarted);
            }
        }
        if let Some(ends_at) = self.ends_at {
            if now > ends_at {
                return Err(VoucherError::Expired);
            }
        }
        if self.usage_limit > 0 {
            let used = match self.usage_scope {
                UsageScope::Global => self.used_count,
                UsageScope::PerUser => user_usage,
            };
            if used >= self.usage_limit {
                return Err(VoucherError::LimitReached);
            }
        }
        if self.min_order_amount > 0 && base_price < self.min_order_amount {
            return Err(VoucherError::BelowMinimumOrder {
                minimum: self.min_order_amount,
            });
        }
        Ok(())
    }

    /// Compute the discount for a base price.
    ///
    /// Raised to the floor, capped at the cap (when set), never more than the
    /// base price, never negative.
    pub fn discount_for(&self, base_price: i64) -> i64 {
        if base_price <= 0 {
            return 0;
        }

        let mut discount = match self.discount_kind {
            DiscountKind::Fixed => self.discount_value,
            DiscountKind::Percentage => (base_price * self.discount_value) / 100,
        };

        if discount < 0 {
            discount = 0;
        }
        if self.min_discount_amount > 0 && discount < self.min_discount_amount {
            discount = self.min_discount_amount;
        }
        if self.max_discount_amount > 0 && discount > self.max_discount_amount {
            discount = self.max_discount_amount;
        }
        if discount > base_price {
            discount = base_price;
        }

        discount
    }

    /// Apply the discount, returning `(discount, final_price)`
    pub fn apply(&self, base_price: i64) -> (i64, i64) {
        let discount = self.discount_for(base_price);
        let final_price = (base_price - discount).max(0);
        (discount, final_price)
    }
}

impl Default for Voucher {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            code: String::new(),
            name: String::new(),
            description: String::new(),
            discount_kind: DiscountKind::Percentage,
            discount_value: 0,
            min_order_amount: 0,
            min_discount_amount: 0,
            max_discount_amount: 0,
            applies_to: VoucherScope::All,
            usage_scope: UsageScope::Global,
            usage_limit: 0,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Record of one committed redemption
///
/// Append-only; per-user usage counts are computed from these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherUsage {
    /// Unique identifier
    pub id: i64,

    /// Redeemed voucher
    pub voucher_id: i64,

    /// Redeeming user
    pub user_id: i64,

    /// Redemption timestamp
    pub created_at: DateTime<Utc>,
}

/// Outcome of a redemption or preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRedemption {
    /// Stored voucher code, empty when no voucher was used
    pub code: String,

    /// Discount applied
    pub discount_amount: i64,

    /// Price after discount
    pub final_price: i64,
}

impl VoucherRedemption {
    /// No-voucher pass-through
    pub fn pass_through(base_price: i64) -> Self {
        Self {
            code: String::new(),
            discount_amount: 0,
            final_price: base_price,
        }
    }
}

/// Payload for creating a voucher
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VoucherDraft {
    #[validate(length(min = 1, max = 64))]
    pub code: String,

    #[validate(length(max = 128))]
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub discount_kind: DiscountKind,

    #[validate(range(min = 1))]
    pub discount_value: i64,

    #[validate(range(min = 0))]
    #[serde(default)]
    pub min_order_amount: i64,

    #[validate(range(min = 0))]
    #[serde(default)]
    pub min_discount_amount: i64,

    #[validate(range(min = 0))]
    #[serde(default)]
    pub max_discount_amount: i64,

    #[serde(default)]
    pub applies_to: VoucherScope,

    #[serde(default)]
    pub usage_scope: UsageScope,

    #[validate(range(min = 0))]
    #[serde(default)]
    pub usage_limit: i64,

    pub starts_at: Option<DateTime<Utc>>,

    pub ends_at: Option<DateTime<Utc>>,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl VoucherDraft {
    /// Cross-field checks that the derive cannot express
    pub fn check(&self) -> Result<(), String> {
        if self.discount_kind == DiscountKind::Percentage && self.discount_value > 100 {
            return Err("percentage discount cannot exceed 100".to_string());
        }
        if let (Some(starts_at), Some(ends_at)) = (self.starts_at, self.ends_at) {
            if ends_at < starts_at {
                return Err("ends_at is before starts_at".to_string());
            }
        }
        Ok(())
    }
}

/// Partial update payload; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoucherPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_kind: Option<DiscountKind>,
    pub discount_value: Option<i64>,
    pub min_order_amount: Option<i64>,
    pub min_discount_amount: Option<i64>,
    pub max_discount_amount: Option<i64>,
    pub applies_to: Option<VoucherScope>,
    pub usage_scope: Option<UsageScope>,
    pub usage_limit: Option<i64>,
    pub starts_at: Option<Option<DateTime<Utc>>>,
    pub ends_at: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn percent_voucher(value: i64) -> Voucher {
        Voucher {
            code: "SAVE10".to_string(),
            discount_kind: DiscountKind::Percentage,
            discount_value: value,
            ..Default::default()
        }
    }

    #[test]
    fn test_percentage_discount_with_cap() {
        let voucher = Voucher {
            max_discount_amount: 5000,
            ..percent_voucher(10)
        };

        let (discount, final_price) = voucher.apply(20_000);
        assert_eq!(discount, 2000);
        assert_eq!(final_price, 18_000);

        // Cap kicks in for larger orders
        let (discount, final_price) = voucher.apply(100_000);
        assert_eq!(discount, 5000);
        assert_eq!(final_price, 95_000);
    }

    #[test]
    fn test_discount_floor_raises() {
        let voucher = Voucher {
            min_discount_amount: 1000,
            ..percent_voucher(1)
        };

        // 1% of 20000 = 200, raised to the 1000 floor
        assert_eq!(voucher.discount_for(20_000), 1000);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_base() {
        let voucher = Voucher {
            discount_kind: DiscountKind::Fixed,
            discount_value: 10_000,
            ..Default::default()
        };

        let (discount, final_price) = voucher.apply(650);
        assert_eq!(discount, 650);
        assert_eq!(final_price, 0);
    }

    #[test]
    fn test_zero_base_price_no_discount() {
        assert_eq!(percent_voucher(50).discount_for(0), 0);
    }

    #[test]
    fn test_check_order_inactive_first() {
        let voucher = Voucher {
            is_active: false,
            applies_to: VoucherScope::Torrent,
            ..percent_voucher(10)
        };

        // Inactive wins over not-applicable
        assert_eq!(
            voucher.check_redeemable(ServiceType::Premium, 1000, 0, Utc::now()),
            Err(VoucherError::Inactive)
        );
    }

    #[test]
    fn test_check_scope() {
        let voucher = Voucher {
            applies_to: VoucherScope::Premium,
            ..percent_voucher(10)
        };

        assert_eq!(
            voucher.check_redeemable(ServiceType::Torrent, 1000, 0, Utc::now()),
            Err(VoucherError::NotApplicable)
        );
        assert!(voucher
            .check_redeemable(ServiceType::Premium, 1000, 0, Utc::now())
            .is_ok());
    }

    #[test]
    fn test_check_validity_window() {
        let now = Utc::now();
        let upcoming = Voucher {
            starts_at: Some(now + Duration::hours(1)),
            ..percent_voucher(10)
        };
        assert_eq!(
            upcoming.check_redeemable(ServiceType::Torrent, 1000, 0, now),
            Err(VoucherError::NotStarted)
        );

        let stale = Voucher {
            ends_at: Some(now - Duration::hours(1)),
            ..percent_voucher(10)
        };
        assert_eq!(
            stale.check_redeemable(ServiceType::Torrent, 1000, 0, now),
            Err(VoucherError::Expired)
        );
    }

    #[test]
    fn test_check_global_limit() {
        let voucher = Voucher {
            usage_limit: 5,
            used_count: 5,
            ..percent_voucher(10)
        };

        assert_eq!(
            voucher.check_redeemable(ServiceType::Torrent, 1000, 0, Utc::now()),
            Err(VoucherError::LimitReached)
        );
    }

    #[test]
    fn test_check_per_user_limit() {
        let voucher = Voucher {
            usage_scope: UsageScope::PerUser,
            usage_limit: 1,
            used_count: 40, // global count is irrelevant for per-user scope
            ..percent_voucher(10)
        };

        assert!(voucher
            .check_redeemable(ServiceType::Torrent, 1000, 0, Utc::now())
            .is_ok());
        assert_eq!(
            voucher.check_redeemable(ServiceType::Torrent, 1000, 1, Utc::now()),
            Err(VoucherError::LimitReached)
        );
    }

    #[test]
    fn test_check_minimum_order() {
        let voucher = Voucher {
            min_order_amount: 10_000,
            ..percent_voucher(10)
        };

        assert_eq!(
            voucher.check_redeemable(ServiceType::Torrent, 9999, 0, Utc::now()),
            Err(VoucherError::BelowMinimumOrder { minimum: 10_000 })
        );
        assert!(voucher
            .check_redeemable(ServiceType::Torrent, 10_000, 0, Utc::now())
            .is_ok());
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let voucher = Voucher {
            usage_limit: 0,
            used_count: 1_000_000,
            ..percent_voucher(10)
        };

        assert!(voucher
            .check_redeemable(ServiceType::Torrent, 1000, 0, Utc::now())
            .is_ok());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(Voucher::normalize_code("  save10 "), "SAVE10");
    }

    #[test]
    fn test_draft_percentage_bound() {
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

        assert!(draft.check().is_err());
    }
}
