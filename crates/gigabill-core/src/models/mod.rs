//! Domain models for billing and admission control

pub mod charge;
pub mod ledger;
pub mod pricing;
pub mod topup;
pub mod user;
pub mod voucher;

pub use charge::*;
pub use ledger::*;
pub use pricing::*;
pub use topup::*;
pub use user::*;
pub use voucher::*;
