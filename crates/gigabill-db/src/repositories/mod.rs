//! Repository implementations
//!
//! This module contains concrete implementations of all repository traits
//! defined in gigabill-core, using sqlx for PostgreSQL access.

pub mod charge_repo;
pub mod ledger_repo;
pub mod pricing_repo;
pub mod topup_repo;
pub mod user_repo;
pub mod voucher_repo;

pub use charge_repo::PgChargeRepository;
pub use ledger_repo::PgLedgerRepository;
pub use pricing_repo::PgPricingRepository;
pub use topup_repo::PgTopUpRepository;
pub use user_repo::PgUserRepository;
pub use voucher_repo::PgVoucherRepository;
