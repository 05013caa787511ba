//! GigaBill Database Layer
//!
//! This crate provides PostgreSQL database access and repository
//! implementations for the GigaBill billing engine. It includes:
//!
//! - Connection pool management with sqlx
//! - Embedded schema migrations
//! - Repository implementations for all domain entities
//! - Transaction support for atomic operations

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use gigabill_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};
