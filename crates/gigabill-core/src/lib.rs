//! GigaBill Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the GigaBill metered-download billing engine. It includes:
//!
//! - Domain models (User, Voucher, TopUpRequest, LedgerEntry, etc.)
//! - Pure pricing and discount calculations
//! - Common traits for repositories and external collaborators
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::{AppError, UpstreamError, UpstreamKind, VoucherError};

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
