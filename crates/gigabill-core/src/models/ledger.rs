//! Ledger entry model
//!
//! Immutable audit log of all balance changes. The committed entries are the
//! source of truth for balance history: the sum of entry amounts for a user
//! always equals the balance movements applied to the user row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    /// Wallet credit from an approved top-up (or positive admin adjustment)
    TopUp,
    /// Debit for a metered download action
    Download,
    /// Manual balance correction by an operator
    Adjustment,
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEntryKind::TopUp => write!(f, "topup"),
            LedgerEntryKind::Download => write!(f, "download"),
            LedgerEntryKind::Adjustment => write!(f, "adjustment"),
        }
    }
}

impl LedgerEntryKind {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "topup" => Some(LedgerEntryKind::TopUp),
            "download" => Some(LedgerEntryKind::Download),
            "adjustment" => Some(LedgerEntryKind::Adjustment),
            _ => None,
        }
    }
}

/// Ledger entry entity
///
/// Append-only. Never updated or deleted once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier
    pub id: i64,

    /// Owner of the balance this entry moved
    pub user_id: i64,

    /// Signed amount (negative for debits)
    pub amount: i64,

    /// Balance before this entry
    pub previous_balance: i64,

    /// Balance after this entry
    pub new_balance: i64,

    /// Kind of movement
    pub kind: LedgerEntryKind,

    /// Human-readable description
    pub description: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a new entry record (id assigned by the store)
    pub fn new(
        user_id: i64,
        amount: i64,
        previous_balance: i64,
        kind: LedgerEntryKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            amount,
            previous_balance,
            new_balance: previous_balance + amount,
            kind,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// Check if this entry reduced the balance
    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }

    /// Check if this entry increased the balance
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}

/// Aggregate counters for the admin overview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LedgerOverview {
    /// Total registered users
    pub users: i64,

    /// Total committed ledger entries
    pub entries: i64,

    /// Sum of all committed top-up credits
    pub topup_revenue: i64,

    /// Top-up requests currently waiting for a decision
    pub pending_topups: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_balance_math() {
        let entry = LedgerEntry::new(1, 50_000, 10_000, LedgerEntryKind::TopUp, "Top Up (gopay)");

        assert_eq!(entry.previous_balance, 10_000);
        assert_eq!(entry.new_balance, 60_000);
        assert!(entry.is_credit());
    }

    #[test]
    fn test_debit_entry() {
        let entry = LedgerEntry::new(
            1,
            -1300,
            10_000,
            LedgerEntryKind::Download,
            "Premium Host: movie.mkv (2 GB) - Rp 1300",
        );

        assert_eq!(entry.new_balance, 8700);
        assert!(entry.is_debit());
    }

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(LedgerEntryKind::from_str("topup"), Some(LedgerEntryKind::TopUp));
        assert_eq!(
            LedgerEntryKind::from_str("ADJUSTMENT"),
            Some(LedgerEntryKind::Adjustment)
        );
        assert_eq!(LedgerEntryKind::from_str("refund"), None);
        assert_eq!(LedgerEntryKind::Download.to_string(), "download");
    }
}
