//! Common traits for repositories and collaborating services
//!
//! Defines abstractions for database access and the two seams the billing
//! engine talks through: notification delivery and charge fulfilment.

use crate::error::AppError;
use crate::models::{
    ChargeRecord, FulfilOutcome, LedgerEntry, LedgerEntryKind, LedgerOverview, Pricing,
    ServiceType, TopUpRequest, TopUpStatus, User, Voucher,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T, ID>: Send + Sync {
    /// Find entity by ID
    async fn find_by_id(&self, id: ID) -> Result<Option<T>, AppError>;

    /// Find all entities with pagination
    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<T>, AppError>;

    /// Count total entities
    async fn count(&self) -> Result<i64, AppError>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<T, AppError>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<T, AppError>;

    /// Delete entity by ID
    async fn delete(&self, id: ID) -> Result<bool, AppError>;
}

/// User repository trait with specialized methods
#[async_trait]
pub trait UserRepository: Repository<User, i64> {
    /// Find user by email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Enable or disable a user
    async fn set_active(&self, id: i64, active: bool) -> Result<(), AppError>;

    /// List users with filtering
    async fn list_filtered(
        &self,
        active: Option<bool>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), AppError>;
}

/// Pricing repository trait with specialized methods
#[async_trait]
pub trait PricingRepository: Repository<Pricing, i64> {
    /// Find the active pricing row for a service
    async fn find_by_service(&self, service: ServiceType) -> Result<Option<Pricing>, AppError>;
}

/// Voucher repository trait with specialized methods
#[async_trait]
pub trait VoucherRepository: Repository<Voucher, i64> {
    /// Find voucher by normalized code
    async fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, AppError>;

    /// Count redemptions of a voucher by one user
    async fn usage_count_for_user(&self, voucher_id: i64, user_id: i64)
        -> Result<i64, AppError>;

    /// List vouchers with filtering
    async fn list_filtered(
        &self,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Voucher>, i64), AppError>;
}

/// Top-up repository trait with specialized methods
#[async_trait]
pub trait TopUpRepository: Repository<TopUpRequest, i64> {
    /// Find request by serial
    async fn find_by_serial(&self, serial: &str) -> Result<Option<TopUpRequest>, AppError>;

    /// Find the user's request still awaiting payment or decision
    async fn find_active_for_user(&self, user_id: i64)
        -> Result<Option<TopUpRequest>, AppError>;

    /// Count cancelled and expired requests created since a cutoff
    async fn count_failures_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError>;

    /// Mark all lapsed unpaid requests expired, returning how many changed
    async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<i64, AppError>;

    /// List a user's requests, newest first
    async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TopUpRequest>, i64), AppError>;

    /// List requests with filtering, newest first
    async fn list_filtered(
        &self,
        status: Option<TopUpStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TopUpRequest>, i64), AppError>;

    /// Requests paid and waiting for an admin decision, oldest first
    async fn pending_queue(&self) -> Result<Vec<TopUpRequest>, AppError>;
}

/// Ledger repository trait.
///
/// The ledger is append-only and every write happens inside a service
/// transaction holding the user-row lease, so this trait is read-only.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Find entry by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<LedgerEntry>, AppError>;

    /// List a user's entries, newest first
    async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64), AppError>;

    /// List entries with filtering, newest first
    async fn list_filtered(
        &self,
        kind: Option<LedgerEntryKind>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64), AppError>;

    /// Aggregate counters for the admin dashboard
    async fn overview(&self) -> Result<LedgerOverview, AppError>;
}

/// Charge record repository trait.
///
/// Charge records are append-only like ledger entries.
#[async_trait]
pub trait ChargeRepository: Send + Sync {
    /// Find record by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<ChargeRecord>, AppError>;

    /// List a user's charges, newest first
    async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChargeRecord>, i64), AppError>;
}

/// Alert pushed to administrators when a request needs review
#[derive(Debug, Clone, Serialize)]
pub struct AdminAlert {
    pub title: String,
    pub body: String,
    pub serial: Option<String>,
}

/// Delivery channel for user and admin notifications.
///
/// Implementations are called after the owning transaction commits; a
/// delivery failure never rolls billing state back.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify one user
    async fn notify_user(&self, user_id: i64, message: &str) -> Result<(), AppError>;

    /// Notify all administrators
    async fn notify_admins(&self, alert: &AdminAlert) -> Result<(), AppError>;
}

/// Work performed between the debit and the commit of a charge.
///
/// The charge workflow debits first, runs this action, and rolls the
/// debit back if the action fails. Gated actions hold an admission permit
/// for the duration of `execute`.
#[async_trait]
pub trait FulfilAction: Send + Sync {
    /// Whether `execute` must pass the admission gate first
    fn gated(&self) -> bool {
        false
    }

    /// Run the action and report what it produced
    async fn execute(&self) -> Result<FulfilOutcome, AppError>;
}

/// Pagination parameters
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

/// Default page size for list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Largest page size a caller may request
pub const MAX_PAGE_SIZE: i64 = 25;

impl Pagination {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Clamp the requested page down to the last page that exists
    pub fn clamp_to_total(&self, total: i64) -> Self {
        let total_pages = PaginationMeta::total_pages_for(total, self.page_size);
        Self {
            page: self.page.min(total_pages),
            page_size: self.page_size,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(total: i64, pagination: Pagination) -> Self {
        Self {
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: Self::total_pages_for(total, pagination.page_size),
        }
    }

    /// Page count, never below one so an empty list still renders page 1
    fn total_pages_for(total: i64, page_size: i64) -> i64 {
        if page_size <= 0 {
            return 1;
        }
        ((total + page_size - 1) / page_size).max(1)
    }
}
