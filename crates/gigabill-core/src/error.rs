//! Unified error handling for GigaBill
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the billing engine, with automatic HTTP response
//! mapping for the HTTP-layer collaborator.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Diagnostic payload carried by an insufficient-balance rejection.
///
/// The HTTP layer renders this verbatim so the UI can show the shortfall,
/// the voucher effect, and the size that was about to be charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceShortfall {
    pub required_price: i64,
    pub current_balance: i64,
    pub original_price: i64,
    pub discount_amount: i64,
    pub voucher_code: String,
    pub required_units: i64,
    pub required_size_gb: i64,
}

impl BalanceShortfall {
    /// Shortfall with no voucher or sizing context (e.g. raw ledger debits).
    pub fn bare(required: i64, balance: i64) -> Self {
        Self {
            required_price: required,
            current_balance: balance,
            original_price: required,
            discount_amount: 0,
            voucher_code: String::new(),
            required_units: 0,
            required_size_gb: 0,
        }
    }
}

/// Voucher redemption failures.
///
/// Each kind is surfaced to the user with a distinct reason; none of them
/// leave any state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoucherError {
    #[error("Voucher not found")]
    NotFound,

    #[error("Voucher is no longer active")]
    Inactive,

    #[error("Voucher does not apply to this service")]
    NotApplicable,

    #[error("Voucher is not valid yet")]
    NotStarted,

    #[error("Voucher has expired")]
    Expired,

    #[error("Voucher usage limit reached")]
    LimitReached,

    #[error("Order total is below the voucher minimum of {minimum}")]
    BelowMinimumOrder { minimum: i64 },
}

impl VoucherError {
    pub fn error_code(&self) -> &'static str {
        match self {
            VoucherError::NotFound => "voucher_not_found",
            VoucherError::Inactive => "voucher_inactive",
            VoucherError::NotApplicable => "voucher_not_applicable",
            VoucherError::NotStarted => "voucher_not_started",
            VoucherError::Expired => "voucher_expired",
            VoucherError::LimitReached => "voucher_limit_reached",
            VoucherError::BelowMinimumOrder { .. } => "voucher_below_minimum_order",
        }
    }
}

/// Sub-kinds of upstream provider failures.
///
/// Terminal kinds require operator or caller intervention; retryable kinds
/// are safe to retry after a delay since the charge rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    InvalidCredentials,
    RateLimited,
    Unsupported,
    Maintenance,
    Other,
}

impl UpstreamKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamKind::RateLimited | UpstreamKind::Maintenance)
    }
}

/// Failure reported by the external provider during fulfil.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::InvalidCredentials, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::RateLimited, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Unsupported, message)
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Maintenance, message)
    }
}

/// Main application error type
///
/// All errors in the engine should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Billing Errors ====================
    #[error("Insufficient balance: required {}, available {}", .0.required_price, .0.current_balance)]
    InsufficientBalance(BalanceShortfall),

    #[error(transparent)]
    Voucher(#[from] VoucherError),

    #[error("Upstream provider error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Too many concurrent upstream requests, try again shortly")]
    AdmissionTimeout,

    // ==================== Top-up Errors ====================
    #[error("An active top-up request already exists")]
    ActiveTopUpExists,

    #[error("Daily limit of {max} cancelled or expired top-ups reached")]
    DailyLimitReached { max: i64 },

    #[error("Top-up request already decided")]
    AlreadyDecided,

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            AppError::Voucher(v) => match v {
                VoucherError::NotFound => StatusCode::NOT_FOUND,
                VoucherError::LimitReached => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },

            AppError::Upstream(u) => match u.kind {
                UpstreamKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
                UpstreamKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                UpstreamKind::Unsupported => StatusCode::BAD_REQUEST,
                UpstreamKind::Maintenance => StatusCode::SERVICE_UNAVAILABLE,
                UpstreamKind::Other => StatusCode::BAD_REQUEST,
            },

            // 402 Payment Required
            AppError::InsufficientBalance(_) => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::UserNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            AppError::AdmissionTimeout => StatusCode::REQUEST_TIMEOUT,

            // 409 Conflict
            AppError::Conflict(_)
            | AppError::AlreadyExists(_)
            | AppError::ActiveTopUpExists
            | AppError::AlreadyDecided => StatusCode::CONFLICT,

            // 429 Too Many Requests
            AppError::DailyLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::InsufficientBalance(_) => "insufficient_balance",
            AppError::Voucher(v) => v.error_code(),
            AppError::Upstream(u) => match u.kind {
                UpstreamKind::InvalidCredentials => "upstream_invalid_credentials",
                UpstreamKind::RateLimited => "upstream_rate_limited",
                UpstreamKind::Unsupported => "upstream_unsupported",
                UpstreamKind::Maintenance => "upstream_maintenance",
                UpstreamKind::Other => "upstream_failed",
            },
            AppError::AdmissionTimeout => "admission_timeout",
            AppError::ActiveTopUpExists => "active_topup_exists",
            AppError::DailyLimitReached { .. } => "daily_limit_reached",
            AppError::AlreadyDecided => "already_decided",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::UserNotFound(_) => "user_not_found",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Upstream(u) => u.kind.is_retryable(),
            AppError::AdmissionTimeout => true,
            _ => false,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        match self {
            AppError::InsufficientBalance(shortfall) => {
                if let (Some(map), Ok(serde_json::Value::Object(extra))) =
                    (body.as_object_mut(), serde_json::to_value(shortfall))
                {
                    map.extend(extra);
                }
            }
            AppError::Upstream(u) => {
                if let Some(map) = body.as_object_mut() {
                    map.insert("retryable".into(), json!(u.kind.is_retryable()));
                }
            }
            _ => {}
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::InsufficientBalance(BalanceShortfall::bare(1300, 650)).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::UserNotFound("42".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::AlreadyDecided.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::DailyLimitReached { max: 3 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::AdmissionTimeout.status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn test_voucher_error_mapping() {
        assert_eq!(
            AppError::from(VoucherError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(VoucherError::LimitReached).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(VoucherError::Expired).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(VoucherError::BelowMinimumOrder { minimum: 10000 }).error_code(),
            "voucher_below_minimum_order"
        );
    }

    #[test]
    fn test_upstream_error_mapping() {
        let auth = AppError::from(UpstreamError::invalid_credentials("bad_token"));
        assert_eq!(auth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(auth.error_code(), "upstream_invalid_credentials");
        assert!(!auth.is_retryable());

        let busy = AppError::from(UpstreamError::rate_limited("too many requests"));
        assert_eq!(busy.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(busy.is_retryable());

        let down = AppError::from(UpstreamError::maintenance("host maintenance"));
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(down.is_retryable());
    }

    #[test]
    fn test_shortfall_payload_fields() {
        let shortfall = BalanceShortfall {
            required_price: 1300,
            current_balance: 650,
            original_price: 1500,
            discount_amount: 200,
            voucher_code: "SAVE10".to_string(),
            required_units: 2,
            required_size_gb: 2,
        };
        let value = serde_json::to_value(&shortfall).unwrap();
        assert_eq!(value["required_price"], 1300);
        assert_eq!(value["current_balance"], 650);
        assert_eq!(value["voucher_code"], "SAVE10");
    }
}
