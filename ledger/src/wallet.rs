//! Wallet model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use corebank_common::{default_max_balance, Currency, UserId, WalletId};

/// Wallet status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    /// Wallet is active and can transact.
    Active,
    /// Wallet is inactive (no transactions allowed).
    Inactive,
    /// Wallet is frozen pending review.
    Frozen,
}

/// A currency-denominated account owned by a user.
///
/// Invariant: `0 <= balance <= max_balance`. Balances only change through
/// [`crate::WalletStore`] under that wallet's serialized mutation scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// Owning user.
    pub owner: UserId,
    /// Current balance, scale 2.
    pub balance: Decimal,
    /// Denomination.
    pub currency: Currency,
    /// Wallet status.
    pub status: WalletStatus,
    /// Ceiling the balance may not exceed.
    pub max_balance: Decimal,
    /// Whether this is the owner's primary wallet.
    pub is_primary: bool,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
    /// When the wallet was last mutated.
    pub last_updated: DateTime<Utc>,
    /// Soft-delete marker; wallets are never hard-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Wallet {
    /// Create a new active wallet with a zero balance.
    pub fn new(owner: UserId, currency: Currency, is_primary: bool) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            owner,
            balance: Decimal::ZERO,
            currency,
            status: WalletStatus::Active,
            max_balance: default_max_balance(),
            is_primary,
            created_at: now,
            last_updated: now,
            deleted_at: None,
        }
    }

    /// Check if the wallet can take part in transactions.
    pub fn can_transact(&self) -> bool {
        self.status == WalletStatus::Active && self.deleted_at.is_none()
    }

    /// Check if the wallet has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_defaults() {
        let wallet = Wallet::new(UserId::new(), Currency::Eur, true);

        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.status, WalletStatus::Active);
        assert_eq!(wallet.max_balance, default_max_balance());
        assert!(wallet.can_transact());
        assert!(!wallet.is_deleted());
    }

    #[test]
    fn test_frozen_wallet_cannot_transact() {
        let mut wallet = Wallet::new(UserId::new(), Currency::Usd, false);
        wallet.status = WalletStatus::Frozen;
        assert!(!wallet.can_transact());
    }
}
