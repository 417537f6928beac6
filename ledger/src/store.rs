//! Wallet store with serialized per-wallet mutation.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use corebank_common::{
    max_balance_ceiling, Currency, LedgerError, Money, Result, UserId, WalletId,
};

use crate::wallet::{Wallet, WalletStatus};

/// Result of a balance mutation.
#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    /// Wallet mutated.
    pub wallet_id: WalletId,
    /// Balance before the mutation.
    pub old_balance: Decimal,
    /// Balance after the mutation.
    pub new_balance: Decimal,
    /// Wallet currency.
    pub currency: Currency,
}

/// Owns all wallets and enforces their balance invariants.
///
/// Mutations to a given wallet are serialized through a keyed lock table: a
/// second mutation on the same wallet waits until the first has fully
/// committed. Mutations to different wallets proceed concurrently.
pub struct WalletStore {
    /// Wallets by id.
    wallets: DashMap<WalletId, Wallet>,
    /// Wallet ids by owner.
    by_owner: DashMap<UserId, Vec<WalletId>>,
    /// Per-wallet mutation locks.
    wallet_locks: DashMap<WalletId, Arc<Mutex<()>>>,
    /// Per-owner locks guarding open/set_primary, which span an owner's
    /// whole wallet set.
    owner_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl WalletStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            by_owner: DashMap::new(),
            wallet_locks: DashMap::new(),
            owner_locks: DashMap::new(),
        }
    }

    fn owner_lock(&self, owner: UserId) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Get the mutation lock for a wallet.
    ///
    /// Callers holding this guard may use the `_held` mutation variants to
    /// batch several mutations into one atomic unit.
    pub fn mutation_lock(&self, wallet_id: WalletId) -> Result<Arc<Mutex<()>>> {
        if !self.wallets.contains_key(&wallet_id) {
            return Err(LedgerError::WalletNotFound(wallet_id));
        }
        Ok(self
            .wallet_locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Open a new wallet for an owner.
    ///
    /// At most one non-deleted wallet per (owner, currency) pair; the first
    /// wallet an owner opens becomes their primary.
    #[instrument(skip(self))]
    pub async fn open(&self, owner: UserId, currency: Currency) -> Result<Wallet> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let existing = self.by_owner.get(&owner).map(|v| v.clone()).unwrap_or_default();
        let mut has_any = false;
        for id in &existing {
            if let Some(w) = self.wallets.get(id) {
                if !w.is_deleted() {
                    has_any = true;
                    if w.currency == currency {
                        return Err(LedgerError::DuplicateWallet {
                            currency: currency.code().to_string(),
                        });
                    }
                }
            }
        }

        let wallet = Wallet::new(owner, currency, !has_any);
        self.wallets.insert(wallet.id, wallet.clone());
        self.by_owner.entry(owner).or_default().push(wallet.id);

        info!(wallet_id = %wallet.id, owner = %owner, currency = %currency, "Wallet opened");
        Ok(wallet)
    }

    /// Get a wallet by id.
    pub fn get(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets
            .get(&wallet_id)
            .map(|w| w.clone())
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }

    /// Get a wallet's current balance.
    pub fn balance(&self, wallet_id: WalletId) -> Result<Money> {
        let wallet = self.get(wallet_id)?;
        Ok(Money::new(wallet.balance, wallet.currency))
    }

    /// All non-deleted wallets for an owner.
    pub fn wallets_for_owner(&self, owner: UserId) -> Vec<Wallet> {
        self.by_owner
            .get(&owner)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.wallets.get(id))
                    .filter(|w| !w.is_deleted())
                    .map(|w| w.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Debit a wallet, acquiring its mutation lock.
    pub async fn debit(&self, wallet_id: WalletId, amount: Decimal) -> Result<BalanceUpdate> {
        let lock = self.mutation_lock(wallet_id)?;
        let _guard = lock.lock().await;
        self.debit_held(wallet_id, amount)
    }

    /// Credit a wallet, acquiring its mutation lock.
    pub async fn credit(&self, wallet_id: WalletId, amount: Decimal) -> Result<BalanceUpdate> {
        let lock = self.mutation_lock(wallet_id)?;
        let _guard = lock.lock().await;
        self.credit_held(wallet_id, amount)
    }

    /// Debit a wallet whose mutation lock the caller already holds.
    pub fn debit_held(&self, wallet_id: WalletId, amount: Decimal) -> Result<BalanceUpdate> {
        validate_mutation_amount(amount)?;

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if !wallet.can_transact() {
            return Err(LedgerError::WalletNotActive(wallet_id));
        }
        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: wallet.balance,
            });
        }

        let old_balance = wallet.balance;
        wallet.balance -= amount;
        wallet.last_updated = chrono::Utc::now();

        Ok(BalanceUpdate {
            wallet_id,
            old_balance,
            new_balance: wallet.balance,
            currency: wallet.currency,
        })
    }

    /// Credit a wallet whose mutation lock the caller already holds.
    pub fn credit_held(&self, wallet_id: WalletId, amount: Decimal) -> Result<BalanceUpdate> {
        validate_mutation_amount(amount)?;

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if !wallet.can_transact() {
            return Err(LedgerError::WalletNotActive(wallet_id));
        }
        let would_be = wallet.balance + amount;
        if would_be > wallet.max_balance {
            return Err(LedgerError::BalanceCeilingExceeded {
                ceiling: wallet.max_balance,
                would_be,
            });
        }

        let old_balance = wallet.balance;
        wallet.balance = would_be;
        wallet.last_updated = chrono::Utc::now();

        Ok(BalanceUpdate {
            wallet_id,
            old_balance,
            new_balance: wallet.balance,
            currency: wallet.currency,
        })
    }

    /// Set a wallet's status.
    pub async fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<()> {
        let lock = self.mutation_lock(wallet_id)?;
        let _guard = lock.lock().await;

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.status = status;
        wallet.last_updated = chrono::Utc::now();
        info!(wallet_id = %wallet_id, status = ?status, "Wallet status changed");
        Ok(())
    }

    /// Make a wallet its owner's primary, clearing the flag on every other
    /// wallet of that owner within the same critical section.
    pub async fn set_primary(&self, wallet_id: WalletId) -> Result<()> {
        let owner = self.get(wallet_id)?.owner;
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let ids = self.by_owner.get(&owner).map(|v| v.clone()).unwrap_or_default();
        for id in ids {
            if let Some(mut w) = self.wallets.get_mut(&id) {
                let make_primary = id == wallet_id;
                if w.is_primary != make_primary {
                    w.is_primary = make_primary;
                    w.last_updated = chrono::Utc::now();
                }
            }
        }
        Ok(())
    }

    /// Soft-delete a wallet. The record is kept; the (owner, currency) slot
    /// is freed for a future wallet.
    pub async fn soft_delete(&self, wallet_id: WalletId) -> Result<()> {
        let lock = self.mutation_lock(wallet_id)?;
        let _guard = lock.lock().await;

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if wallet.deleted_at.is_none() {
            wallet.deleted_at = Some(chrono::Utc::now());
            wallet.status = WalletStatus::Inactive;
            wallet.last_updated = chrono::Utc::now();
        }
        Ok(())
    }

    /// Raise or lower a wallet's balance ceiling.
    pub async fn set_max_balance(&self, wallet_id: WalletId, ceiling: Decimal) -> Result<()> {
        if ceiling < Decimal::ZERO || ceiling > max_balance_ceiling() {
            return Err(LedgerError::Validation {
                message: format!("Ceiling must be within 0..={}", max_balance_ceiling()),
                field: Some("max_balance".to_string()),
            });
        }

        let lock = self.mutation_lock(wallet_id)?;
        let _guard = lock.lock().await;

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        if ceiling < wallet.balance {
            return Err(LedgerError::Validation {
                message: "Ceiling cannot drop below the current balance".to_string(),
                field: Some("max_balance".to_string()),
            });
        }
        wallet.max_balance = ceiling;
        wallet.last_updated = chrono::Utc::now();
        Ok(())
    }

    /// Sum of balances across all non-deleted wallets in a currency.
    pub fn total_balance(&self, currency: Currency) -> Decimal {
        self.wallets
            .iter()
            .filter(|w| w.currency == currency && !w.is_deleted())
            .map(|w| w.balance)
            .sum()
    }
}

impl Default for WalletStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_mutation_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation {
            message: "Mutation amount must be positive".to_string(),
            field: Some("amount".to_string()),
        });
    }
    if amount != amount.round_dp(2) {
        return Err(LedgerError::Validation {
            message: "Mutation amount precision exceeds two decimal places".to_string(),
            field: Some("amount".to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc as StdArc;

    async fn funded_wallet(store: &WalletStore, amount: Decimal) -> Wallet {
        let wallet = store.open(UserId::new(), Currency::Eur).await.unwrap();
        store.credit(wallet.id, amount).await.unwrap();
        store.get(wallet.id).unwrap()
    }

    #[tokio::test]
    async fn test_open_enforces_one_wallet_per_currency() {
        let store = WalletStore::new();
        let owner = UserId::new();

        store.open(owner, Currency::Eur).await.unwrap();
        let dup = store.open(owner, Currency::Eur).await;
        assert!(matches!(dup, Err(LedgerError::DuplicateWallet { .. })));

        // A different currency is fine.
        store.open(owner, Currency::Usd).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_wallet_is_primary() {
        let store = WalletStore::new();
        let owner = UserId::new();

        let first = store.open(owner, Currency::Eur).await.unwrap();
        let second = store.open(owner, Currency::Usd).await.unwrap();

        assert!(first.is_primary);
        assert!(!second.is_primary);
    }

    #[tokio::test]
    async fn test_set_primary_clears_others() {
        let store = WalletStore::new();
        let owner = UserId::new();

        let first = store.open(owner, Currency::Eur).await.unwrap();
        let second = store.open(owner, Currency::Usd).await.unwrap();

        store.set_primary(second.id).await.unwrap();

        assert!(!store.get(first.id).unwrap().is_primary);
        assert!(store.get(second.id).unwrap().is_primary);

        let primaries = store
            .wallets_for_owner(owner)
            .into_iter()
            .filter(|w| w.is_primary)
            .count();
        assert_eq!(primaries, 1);
    }

    #[tokio::test]
    async fn test_debit_and_credit() {
        let store = WalletStore::new();
        let wallet = funded_wallet(&store, dec!(100.00)).await;

        let update = store.debit(wallet.id, dec!(40.00)).await.unwrap();
        assert_eq!(update.old_balance, dec!(100.00));
        assert_eq!(update.new_balance, dec!(60.00));

        let err = store.debit(wallet.id, dec!(1000.00)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(store.balance(wallet.id).unwrap().value, dec!(60.00));
    }

    #[tokio::test]
    async fn test_credit_respects_ceiling() {
        let store = WalletStore::new();
        let wallet = store.open(UserId::new(), Currency::Eur).await.unwrap();
        store.set_max_balance(wallet.id, dec!(50.00)).await.unwrap();

        let err = store.credit(wallet.id, dec!(50.01)).await.unwrap_err();
        assert!(matches!(err, LedgerError::BalanceCeilingExceeded { .. }));
        assert_eq!(store.balance(wallet.id).unwrap().value, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_frozen_wallet_rejects_mutation() {
        let store = WalletStore::new();
        let wallet = funded_wallet(&store, dec!(100.00)).await;
        store.set_status(wallet.id, WalletStatus::Frozen).await.unwrap();

        let err = store.debit(wallet.id, dec!(10.00)).await.unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotActive(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_frees_currency_slot() {
        let store = WalletStore::new();
        let owner = UserId::new();
        let wallet = store.open(owner, Currency::Eur).await.unwrap();

        store.soft_delete(wallet.id).await.unwrap();
        assert!(store.get(wallet.id).unwrap().is_deleted());

        // The slot is free again.
        store.open(owner, Currency::Eur).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let store = StdArc::new(WalletStore::new());
        let wallet = funded_wallet(&store, dec!(100.00)).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = wallet.id;
            handles.push(tokio::spawn(async move {
                store.debit(id, dec!(10.00)).await.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        // Exactly ten debits fit in 100.00; the rest fail cleanly.
        assert_eq!(successes, 10);
        assert_eq!(store.balance(wallet.id).unwrap().value, Decimal::ZERO);
    }
}
