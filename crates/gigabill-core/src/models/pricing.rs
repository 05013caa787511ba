//! Pricing model and the chargeable-unit calculator
//!
//! Converts a raw byte size into billable units. Every metered service has
//! one pricing row; compiled defaults cover a store with no active rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;

/// Metered service type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Torrent/magnet offload downloads
    #[default]
    Torrent,
    /// Premium-host link unrestriction
    Premium,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Torrent => write!(f, "torrent"),
            ServiceType::Premium => write!(f, "premium"),
        }
    }
}

impl ServiceType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "torrent" => Some(ServiceType::Torrent),
            "premium" => Some(ServiceType::Premium),
            _ => None,
        }
    }
}

/// Result of a pricing calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Total price for the charged size
    pub price: i64,

    /// Number of chargeable units billed
    pub charged_units: i64,

    /// Billed size after rounding, in GB
    pub charged_size_gb: i64,
}

/// Pricing entity
///
/// One row per service type. `unit_size_gb` is the rounding granularity:
/// sizes are always billed as whole multiples of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    /// Unique identifier
    pub id: i64,

    /// Service this pricing applies to (unique)
    pub service_type: ServiceType,

    /// Human-readable service name
    pub display_name: String,

    /// Price per chargeable unit
    pub price_per_unit: i64,

    /// GB per chargeable unit
    pub unit_size_gb: i64,

    /// Short description shown to users
    pub description: String,

    /// Whether this row is currently in effect
    pub is_active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Pricing {
    /// Compiled default used when no active pricing row exists
    pub fn default_for(service: ServiceType) -> Self {
        let now = Utc::now();
        match service {
            ServiceType::Torrent => Self {
                id: 0,
                service_type: ServiceType::Torrent,
                display_name: "Torrent/Magnet".to_string(),
                price_per_unit: 650,
                unit_size_gb: 1,
                description: "Rp 650/GB".to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            ServiceType::Premium => Self {
                id: 0,
                service_type: ServiceType::Premium,
                display_name: "Premium Host".to_string(),
                price_per_unit: 2000,
                unit_size_gb: 2,
                description: "Rp 2.000/2GB".to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Compute the price for a raw byte size.
    ///
    /// Unknown or negative sizes clamp to 0 and are billed as one unit.
    /// The size is rounded up to whole GB, raised to at least one unit, then
    /// rounded up to the next unit multiple. Never returns less than one
    /// unit's price, even for degenerate configuration.
    pub fn quote(&self, size_bytes: i64) -> PriceQuote {
        let unit_size = self.unit_size_gb.max(1);
        let bytes = size_bytes.max(0);

        let size_gb = bytes as f64 / BYTES_PER_GB as f64;
        let mut charged_gb = size_gb as i64;
        if (charged_gb as f64) < size_gb {
            charged_gb += 1;
        }
        if charged_gb < unit_size {
            charged_gb = unit_size;
        }

        let mut charged_units = charged_gb / unit_size;
        if charged_gb % unit_size != 0 {
            charged_units += 1;
        }
        charged_gb = charged_units * unit_size;

        let price = charged_units * self.price_per_unit;
        if price <= 0 {
            return PriceQuote {
                price: self.price_per_unit,
                charged_units: 1,
                charged_size_gb: unit_size,
            };
        }

        PriceQuote {
            price,
            charged_units,
            charged_size_gb: charged_gb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn per_gb(price: i64) -> Pricing {
        Pricing {
            price_per_unit: price,
            unit_size_gb: 1,
            ..Pricing::default_for(ServiceType::Torrent)
        }
    }

    #[test]
    fn test_zero_bytes_charges_one_unit() {
        let quote = per_gb(650).quote(0);
        assert_eq!(quote.charged_units, 1);
        assert_eq!(quote.charged_size_gb, 1);
        assert_eq!(quote.price, 650);
    }

    #[test]
    fn test_negative_size_clamps_to_zero() {
        let quote = per_gb(650).quote(-42);
        assert_eq!(quote.charged_units, 1);
        assert_eq!(quote.price, 650);
    }

    #[test]
    fn test_exact_unit_boundary() {
        let pricing = Pricing {
            price_per_unit: 2000,
            unit_size_gb: 2,
            ..Pricing::default_for(ServiceType::Premium)
        };

        let quote = pricing.quote(2 * BYTES_PER_GB);
        assert_eq!(quote.charged_units, 1);
        assert_eq!(quote.charged_size_gb, 2);
        assert_eq!(quote.price, 2000);
    }

    #[test]
    fn test_one_byte_over_boundary() {
        let pricing = Pricing {
            price_per_unit: 2000,
            unit_size_gb: 2,
            ..Pricing::default_for(ServiceType::Premium)
        };

        let quote = pricing.quote(2 * BYTES_PER_GB + 1);
        assert_eq!(quote.charged_units, 2);
        assert_eq!(quote.charged_size_gb, 4);
        assert_eq!(quote.price, 4000);
    }

    #[test]
    fn test_fractional_size_rounds_up() {
        // 1.5 GB at 650/GB bills 2 GB
        let quote = per_gb(650).quote(BYTES_PER_GB + BYTES_PER_GB / 2);
        assert_eq!(quote.charged_size_gb, 2);
        assert_eq!(quote.charged_units, 2);
        assert_eq!(quote.price, 1300);
    }

    #[test]
    fn test_small_size_below_unit() {
        let pricing = Pricing {
            price_per_unit: 2000,
            unit_size_gb: 2,
            ..Pricing::default_for(ServiceType::Premium)
        };

        // 700 MB still bills one full 2 GB unit
        let quote = pricing.quote(700 * 1024 * 1024);
        assert_eq!(quote.charged_units, 1);
        assert_eq!(quote.charged_size_gb, 2);
        assert_eq!(quote.price, 2000);
    }

    #[test]
    fn test_degenerate_price_falls_back_to_one_unit() {
        let quote = per_gb(0).quote(5 * BYTES_PER_GB);
        assert_eq!(quote.charged_units, 1);
        assert_eq!(quote.price, 0);
        assert_eq!(quote.charged_size_gb, 1);
    }

    #[test]
    fn test_service_type_parsing() {
        assert_eq!(ServiceType::from_str("Torrent"), Some(ServiceType::Torrent));
        assert_eq!(ServiceType::from_str("premium"), Some(ServiceType::Premium));
        assert_eq!(ServiceType::from_str("vpn"), None);
    }
}
