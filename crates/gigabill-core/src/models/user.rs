//! User model
//!
//! Represents the wallet-owning user. Authentication and profile concerns
//! live outside this engine; only the billing-relevant fields are here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User entity
///
/// The balance is an integer amount in minor-unit-free currency (Rupiah
/// style). It is mutated only by the balance ledger under a row lease and is
/// never negative after a committed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,

    /// Login email (unique)
    pub email: String,

    /// Preferred display name, falls back to email when absent
    pub display_name: Option<String>,

    /// Current wallet balance
    pub balance: i64,

    /// Whether the user may spend
    pub is_active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name used on serials and notifications
    pub fn billing_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.email,
        }
    }

    /// Check if the user can cover a charge
    #[inline]
    pub fn can_afford(&self, amount: i64) -> bool {
        self.is_active && self.balance >= amount
    }
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: 0,
            email: String::new(),
            display_name: None,
            balance: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_afford() {
        let user = User {
            balance: 10_000,
            ..Default::default()
        };

        assert!(user.can_afford(10_000));
        assert!(!user.can_afford(10_001));
    }

    #[test]
    fn test_inactive_user_cannot_afford() {
        let user = User {
            balance: 10_000,
            is_active: false,
            ..Default::default()
        };

        assert!(!user.can_afford(1));
    }

    #[test]
    fn test_billing_name_fallback() {
        let mut user = User {
            email: "narto@example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(user.billing_name(), "narto@example.com");

        user.display_name = Some("narto".to_string());
        assert_eq!(user.billing_name(), "narto");
    }
}
