//! # aula-types
//!
//! Shared domain types used across the aula workspace: identifiers,
//! currency units, and the enums that travel between the payment services
//! and the persistence layer.

use serde::{Deserialize, Serialize};

/// Common type aliases.
pub type UserId = u64;
pub type PackageId = u64;
pub type CodeId = i64;
pub type TxId = i64;
pub type EntitlementId = i64;

/// Wallet balances and prices are integer credits (no fractional units).
pub type Credits = u64;

/// Seconds in one day, used to convert package durations to expiry times.
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// How a purchase was paid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Spend prepaid wallet balance.
    Wallet,
    /// Redeem a single-use activation code.
    Code,
}

impl PaymentMethod {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Code => "code",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wallet" => Some(PaymentMethod::Wallet),
            "code" => Some(PaymentMethod::Code),
            _ => None,
        }
    }
}

/// Where an entitlement came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    /// Paid from wallet balance.
    Wallet,
    /// Redeemed from an activation code.
    Code,
}

impl EntitlementSource {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementSource::Wallet => "wallet",
            EntitlementSource::Code => "code",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wallet" => Some(EntitlementSource::Wallet),
            "code" => Some(EntitlementSource::Code),
            _ => None,
        }
    }
}

/// Kind of a wallet ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Balance increase (top-up or compensation credit).
    Add,
    /// Plain balance decrease.
    Deduct,
    /// Balance decrease in the context of a package purchase.
    Purchase,
}

impl TransactionKind {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Add => "add",
            TransactionKind::Deduct => "deduct",
            TransactionKind::Purchase => "purchase",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(TransactionKind::Add),
            "deduct" => Some(TransactionKind::Deduct),
            "purchase" => Some(TransactionKind::Purchase),
            _ => None,
        }
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_roundtrip() {
        for m in [PaymentMethod::Wallet, PaymentMethod::Code] {
            assert_eq!(PaymentMethod::parse(m.as_str()), Some(m));
        }
        assert_eq!(PaymentMethod::parse("cash"), None);
    }

    #[test]
    fn test_entitlement_source_roundtrip() {
        for s in [EntitlementSource::Wallet, EntitlementSource::Code] {
            assert_eq!(EntitlementSource::parse(s.as_str()), Some(s));
        }
        assert_eq!(EntitlementSource::parse(""), None);
    }

    #[test]
    fn test_transaction_kind_roundtrip() {
        for k in [
            TransactionKind::Add,
            TransactionKind::Deduct,
            TransactionKind::Purchase,
        ] {
            assert_eq!(TransactionKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(TransactionKind::parse("refund"), None);
    }

    #[test]
    fn test_unix_now_reasonable() {
        // Past 2023-01-01.
        assert!(unix_now() > 1_672_531_200);
    }
}
