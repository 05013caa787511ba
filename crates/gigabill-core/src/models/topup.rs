//! Top-up request model and lifecycle
//!
//! A top-up request walks a one-way state machine:
//! awaiting_payment → {pending, cancelled, expired}; pending → {approved,
//! rejected}. Terminal states never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-up request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopUpStatus {
    /// Created, waiting for the user to transfer and confirm
    #[default]
    AwaitingPayment,
    /// User confirmed payment, waiting for an admin decision
    Pending,
    /// Admin approved; balance was credited
    Approved,
    /// Admin rejected; no balance change
    Rejected,
    /// User cancelled before paying
    Cancelled,
    /// Payment window lapsed before confirmation
    Expired,
}

impl fmt::Display for TopUpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopUpStatus::AwaitingPayment => write!(f, "awaiting_payment"),
            TopUpStatus::Pending => write!(f, "pending"),
            TopUpStatus::Approved => write!(f, "approved"),
            TopUpStatus::Rejected => write!(f, "rejected"),
            TopUpStatus::Cancelled => write!(f, "cancelled"),
            TopUpStatus::Expired => write!(f, "expired"),
        }
    }
}

impl TopUpStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "awaiting_payment" => Some(TopUpStatus::AwaitingPayment),
            "pending" => Some(TopUpStatus::Pending),
            "approved" => Some(TopUpStatus::Approved),
            "rejected" => Some(TopUpStatus::Rejected),
            "cancelled" => Some(TopUpStatus::Cancelled),
            "expired" => Some(TopUpStatus::Expired),
            _ => None,
        }
    }

    /// Check if the request still blocks a new one for the same user
    pub fn is_active(&self) -> bool {
        matches!(self, TopUpStatus::AwaitingPayment | TopUpStatus::Pending)
    }

    /// Check if the status can never change again
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Check if the request failed without an admin decision
    pub fn is_failure(&self) -> bool {
        matches!(self, TopUpStatus::Cancelled | TopUpStatus::Expired)
    }

    /// Valid forward transitions of the state machine
    pub fn can_transition_to(&self, next: TopUpStatus) -> bool {
        match self {
            TopUpStatus::AwaitingPayment => matches!(
                next,
                TopUpStatus::Pending | TopUpStatus::Cancelled | TopUpStatus::Expired
            ),
            TopUpStatus::Pending => {
                matches!(next, TopUpStatus::Approved | TopUpStatus::Rejected)
            }
            _ => false,
        }
    }
}

/// Supported manual payment methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gopay,
    Bri,
    BankJago,
    CryptoUsdt,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Gopay => write!(f, "gopay"),
            PaymentMethod::Bri => write!(f, "bri"),
            PaymentMethod::BankJago => write!(f, "bank_jago"),
            PaymentMethod::CryptoUsdt => write!(f, "crypto_usdt"),
        }
    }
}

impl PaymentMethod {
    /// All supported methods, in display order
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Gopay,
        PaymentMethod::Bri,
        PaymentMethod::BankJago,
        PaymentMethod::CryptoUsdt,
    ];

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gopay" => Some(PaymentMethod::Gopay),
            "bri" => Some(PaymentMethod::Bri),
            "bank_jago" => Some(PaymentMethod::BankJago),
            "crypto_usdt" => Some(PaymentMethod::CryptoUsdt),
            _ => None,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Gopay => "GoPay",
            PaymentMethod::Bri => "BRI",
            PaymentMethod::BankJago => "Bank Jago",
            PaymentMethod::CryptoUsdt => "Crypto (USDT)",
        }
    }

    /// Three-character prefix used on serials
    pub fn serial_prefix(&self) -> &'static str {
        match self {
            PaymentMethod::Gopay => "GOP",
            PaymentMethod::Bri => "BRI",
            PaymentMethod::BankJago => "JGO",
            PaymentMethod::CryptoUsdt => "USD",
        }
    }
}

/// Admin decision on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopUpDecision {
    Approved,
    Rejected,
}

impl fmt::Display for TopUpDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopUpDecision::Approved => write!(f, "approved"),
            TopUpDecision::Rejected => write!(f, "rejected"),
        }
    }
}

impl TopUpDecision {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "approved" => Some(TopUpDecision::Approved),
            "rejected" => Some(TopUpDecision::Rejected),
            _ => None,
        }
    }

    /// Status this decision moves the request into
    pub fn target_status(&self) -> TopUpStatus {
        match self {
            TopUpDecision::Approved => TopUpStatus::Approved,
            TopUpDecision::Rejected => TopUpStatus::Rejected,
        }
    }
}

/// Destination account a user transfers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpDestination {
    pub method: PaymentMethod,
    pub label: String,
    pub account: String,
}

/// Top-up request entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpRequest {
    /// Unique identifier
    pub id: i64,

    /// Human-readable serial shown on the transfer
    pub serial: String,

    /// Requesting user
    pub user_id: i64,

    /// Name snapshot used on the serial
    pub username: String,

    /// Requested credit amount
    pub amount: i64,

    /// Chosen payment method
    pub payment_method: PaymentMethod,

    /// Destination account at creation time
    pub payment_account: String,

    /// Current lifecycle status
    pub status: TopUpStatus,

    /// Payment deadline
    pub expires_at: DateTime<Utc>,

    /// When the user confirmed payment
    pub paid_at: Option<DateTime<Utc>>,

    /// When the user cancelled
    pub cancelled_at: Option<DateTime<Utc>>,

    /// When an admin decided
    pub decided_at: Option<DateTime<Utc>>,

    /// Reason attached to the decision
    pub admin_reason: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl TopUpRequest {
    /// Check whether the payment window has lapsed for an unpaid request
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == TopUpStatus::AwaitingPayment && self.expires_at < now
    }

    /// Build a serial: `(method prefix)(DDMMYYHH)(name prefix)(suffix)`.
    ///
    /// The caller supplies the 3-character random suffix.
    pub fn build_serial(
        method: PaymentMethod,
        username: &str,
        at: DateTime<Utc>,
        suffix: &str,
    ) -> String {
        format!(
            "{}{}{}{}",
            method.serial_prefix(),
            at.format("%d%m%y%H"),
            Self::name_prefix(username),
            suffix
        )
    }

    /// First three alphanumeric characters of the name, uppercased, padded
    /// with `X`
    pub fn name_prefix(username: &str) -> String {
        let mut prefix: String = username
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(3)
            .collect();
        while prefix.len() < 3 {
            prefix.push('X');
        }
        prefix
    }
}

impl Default for TopUpRequest {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            serial: String::new(),
            user_id: 0,
            username: String::new(),
            amount: 0,
            payment_method: PaymentMethod::Gopay,
            payment_account: String::new(),
            status: TopUpStatus::AwaitingPayment,
            expires_at: now + chrono::Duration::minutes(30),
            paid_at: None,
            cancelled_at: None,
            decided_at: None,
            admin_reason: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
