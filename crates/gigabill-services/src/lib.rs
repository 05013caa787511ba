//! Business logic services for GigaBill
//!
//! This crate contains all the business logic services that orchestrate
//! billing operations: pricing and charging, voucher redemption, the
//! balance ledger, the top-up lifecycle, and upstream admission control.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its dependencies (repositories, gate, notifier)
//! - Services are wrapped in Arc for safe sharing across async tasks
//! - All operations are instrumented with tracing
//! - Comprehensive error handling with AppError
//!
//! # Services
//!
//! - `ChargeService` - Priced, voucher-aware, all-or-nothing charges
//! - `VoucherService` - Voucher redemption, preview, and admin CRUD
//! - `BalanceLedger` - Balance mutations and the append-only ledger
//! - `TopUpService` - Manual top-up lifecycle with admin decisions
//! - `AdmissionGate` - Bounded-concurrency gate for upstream calls

pub mod charge;
pub mod gate;
pub mod ledger;
pub mod topup;
pub mod voucher;

pub use charge::ChargeService;
pub use gate::{AdmissionGate, AdmissionPermit};
pub use ledger::{BalanceAdjustment, BalanceLedger};
pub use topup::TopUpService;
pub use voucher::VoucherService;

/// Business logic constants
pub mod constants {
    /// Characters used for the random part of a top-up serial
    pub const SERIAL_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    /// Number of random characters at the end of a top-up serial
    pub const SERIAL_SUFFIX_LEN: usize = 3;

    /// Ledger entries a plain history view returns without pagination
    pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
}
