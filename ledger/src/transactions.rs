//! Time-bucketed transaction records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use corebank_common::{LedgerError, Result, Transaction, TransactionId};

type DayIndex = BTreeMap<NaiveDate, BTreeSet<(DateTime<Utc>, TransactionId)>>;

/// Stores transactions by id with a day-bucketed time index, so range scans
/// walk only the buckets they touch and old buckets can be pruned whole.
pub struct TransactionStore {
    by_id: DashMap<TransactionId, Transaction>,
    by_day: RwLock<DayIndex>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_day: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert a new transaction.
    pub fn insert(&self, transaction: Transaction) {
        let key = (transaction.created_at, transaction.id);
        self.by_day
            .write()
            .entry(transaction.created_at.date_naive())
            .or_default()
            .insert(key);
        self.by_id.insert(transaction.id, transaction);
    }

    /// Get a transaction by id.
    pub fn get(&self, id: TransactionId) -> Result<Transaction> {
        self.by_id
            .get(&id)
            .map(|t| t.clone())
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// Check whether a transaction exists.
    pub fn exists(&self, id: TransactionId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Mutate a transaction in place. The closure runs under the record's
    /// map shard lock, so the read-modify-write is atomic per record.
    pub fn update<F>(&self, id: TransactionId, mutate: F) -> Result<Transaction>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut entry = self
            .by_id
            .get_mut(&id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        mutate(entry.value_mut())?;
        Ok(entry.clone())
    }

    /// Transactions created within the range, ascending by (created_at, id).
    pub fn list_range(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Vec<Transaction> {
        let index = self.by_day.read();
        index
            .range(from.date_naive()..=until.date_naive())
            .flat_map(|(_, keys)| keys.iter())
            .filter(|(created_at, _)| *created_at >= from && *created_at <= until)
            .filter_map(|(_, id)| self.by_id.get(id).map(|t| t.clone()))
            .collect()
    }

    /// Drop whole day buckets older than `cutoff`. Returns the number of
    /// transactions removed.
    pub fn prune_before(&self, cutoff: NaiveDate) -> usize {
        let mut index = self.by_day.write();
        let keep = index.split_off(&cutoff);
        let mut removed = 0;
        for keys in index.values() {
            for (_, id) in keys {
                self.by_id.remove(id);
                removed += 1;
            }
        }
        *index = keep;
        removed
    }

    /// Total transactions currently retained.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_common::{
        Currency, TransactionMethod, TransactionStatus, TransactionType, WalletId,
    };
    use rust_decimal_macros::dec;

    fn deposit(amount: rust_decimal::Decimal) -> Transaction {
        Transaction::new(
            TransactionType::Deposit,
            TransactionMethod::BankTransfer,
            None,
            Some(WalletId::new()),
            amount,
            Currency::Eur,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let store = TransactionStore::new();
        let tx = deposit(dec!(25.00));
        let id = tx.id;
        store.insert(tx);

        assert!(store.exists(id));
        assert_eq!(store.get(id).unwrap().amount, dec!(25.00));
    }

    #[test]
    fn test_get_missing_fails() {
        let store = TransactionStore::new();
        let err = store.get(TransactionId::new()).unwrap_err();
        assert!(matches!(err, LedgerError::TransactionNotFound(_)));
    }

    #[test]
    fn test_update_applies_transition() {
        let store = TransactionStore::new();
        let tx = deposit(dec!(10.00));
        let id = tx.id;
        store.insert(tx);

        let updated = store
            .update(id, |t| t.transition_to(TransactionStatus::Completed))
            .unwrap();
        assert_eq!(updated.status, TransactionStatus::Completed);
        assert!(updated.completed_at.is_some());
    }

    #[test]
    fn test_list_range_is_time_ordered() {
        let store = TransactionStore::new();
        for i in 1..=4u32 {
            store.insert(deposit(rust_decimal::Decimal::from(i)));
        }

        let from = Utc::now() - chrono::Duration::hours(1);
        let until = Utc::now() + chrono::Duration::hours(1);
        let listed = store.list_range(from, until);

        assert_eq!(listed.len(), 4);
        listed
            .windows(2)
            .for_each(|w| assert!((w[0].created_at, w[0].id) <= (w[1].created_at, w[1].id)));
    }
}
