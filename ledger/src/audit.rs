//! Append-only, tamper-evident audit trail of balance changes.
//!
//! Entries are stored in day buckets so that old history can be pruned
//! without touching live data, and within a bucket they are ordered by
//! (timestamp, id) so scans come back in append order.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use corebank_common::{
    AuditEntryId, LedgerError, Result, TransactionId, UserId, WalletId,
};
use corebank_crypto::sha256_hex;

use crate::store::WalletStore;

/// Kind of balance change an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Deposit,
    Withdrawal,
    Transfer,
    Adjustment,
    Fee,
    Reversal,
    Chargeback,
}

/// One immutable record of a single balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier, time-ordered.
    pub id: AuditEntryId,
    /// Wallet whose balance changed.
    pub wallet_id: WalletId,
    /// User on whose behalf the change was made.
    pub acting_user: UserId,
    /// Balance before the change.
    pub old_balance: Decimal,
    /// Balance after the change.
    pub new_balance: Decimal,
    /// Always `new_balance - old_balance`, derived at append time.
    pub change_amount: Decimal,
    /// Kind of change.
    pub operation_type: OperationType,
    /// Transaction this change belongs to, if any.
    pub transaction_id: Option<TransactionId>,
    /// Hex digest over (wallet id, new balance, timestamp).
    pub entry_hash: String,
    /// Truncated origin address, network portion only.
    pub origin: Option<String>,
    /// Which surface the change came through (web, mobile, batch).
    pub source_system: Option<String>,
    /// Additional operator commentary.
    pub notes: Option<String>,
    /// When the change happened.
    pub changed_at: DateTime<Utc>,
}

/// Input to [`AuditLogger::append`].
#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub wallet_id: WalletId,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub operation_type: OperationType,
    /// Resolved from the wallet's owner when absent.
    pub acting_user: Option<UserId>,
    pub transaction_id: Option<TransactionId>,
    pub origin: Option<IpAddr>,
    pub source_system: Option<String>,
    pub notes: Option<String>,
}

/// Paging cursor for [`AuditLogger::list`]. Opaque to callers; resuming with
/// the cursor from a previous page continues exactly where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCursor {
    pub changed_at: DateTime<Utc>,
    pub entry_id: AuditEntryId,
}

/// Compute the integrity hash for an entry's identity fields.
///
/// The canonical input is the concatenation of the wallet id, the new
/// balance, and the RFC 3339 timestamp, with no separators.
pub fn compute_hash(
    wallet_id: WalletId,
    new_balance: Decimal,
    changed_at: DateTime<Utc>,
) -> String {
    let canonical = format!("{}{}{}", wallet_id, new_balance, changed_at.to_rfc3339());
    sha256_hex(canonical.as_bytes())
}

/// Reduce an origin address to its network portion before storage:
/// /24 for IPv4, /64 for IPv6.
pub fn truncate_ip(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", s[0], s[1], s[2], s[3])
        }
    }
}

type DayBucket = BTreeMap<(DateTime<Utc>, AuditEntryId), AuditEntry>;

/// Append-only audit log, bucketed by day.
pub struct AuditLogger {
    wallets: Arc<WalletStore>,
    partitions: RwLock<BTreeMap<NaiveDate, DayBucket>>,
}

impl AuditLogger {
    pub fn new(wallets: Arc<WalletStore>) -> Self {
        Self {
            wallets,
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Append one entry. The change amount is derived here, never taken
    /// from the caller, and the entry hash is computed over the stored
    /// timestamp so a later recomputation can detect tampering.
    #[instrument(skip(self, request), fields(wallet_id = %request.wallet_id))]
    pub fn append(&self, request: AuditRequest) -> Result<AuditEntry> {
        let acting_user = match request.acting_user {
            Some(user) => user,
            None => self.wallets.get(request.wallet_id)?.owner,
        };
        if request.old_balance < Decimal::ZERO || request.new_balance < Decimal::ZERO {
            return Err(LedgerError::Validation {
                message: "Audited balances cannot be negative".to_string(),
                field: Some("balance".to_string()),
            });
        }

        let changed_at = Utc::now();
        let entry = AuditEntry {
            id: AuditEntryId::new(),
            wallet_id: request.wallet_id,
            acting_user,
            old_balance: request.old_balance,
            new_balance: request.new_balance,
            change_amount: request.new_balance - request.old_balance,
            operation_type: request.operation_type,
            transaction_id: request.transaction_id,
            entry_hash: compute_hash(request.wallet_id, request.new_balance, changed_at),
            origin: request.origin.map(truncate_ip),
            source_system: request.source_system,
            notes: request.notes,
            changed_at,
        };

        let mut partitions = self.partitions.write();
        partitions
            .entry(changed_at.date_naive())
            .or_default()
            .insert((changed_at, entry.id), entry.clone());

        debug!(entry_id = %entry.id, change = %entry.change_amount, "Audit entry appended");
        Ok(entry)
    }

    /// Recompute an entry's hash and compare it with the stored one.
    pub fn verify_integrity(entry: &AuditEntry) -> bool {
        compute_hash(entry.wallet_id, entry.new_balance, entry.changed_at) == entry.entry_hash
    }

    /// List a wallet's entries within a time range, ascending by
    /// (timestamp, id). Returns at most `limit` entries and a cursor to
    /// resume from when more remain.
    pub fn list(
        &self,
        wallet_id: WalletId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        cursor: Option<AuditCursor>,
        limit: usize,
    ) -> (Vec<AuditEntry>, Option<AuditCursor>) {
        let partitions = self.partitions.read();
        let mut page: Vec<AuditEntry> = Vec::with_capacity(limit.min(64));
        let mut next = None;

        let resume_key = cursor.map(|c| (c.changed_at, c.entry_id));

        'scan: for (_, bucket) in partitions.range(from.date_naive()..=until.date_naive()) {
            for (key, entry) in bucket {
                if entry.changed_at < from || entry.changed_at > until {
                    continue;
                }
                if resume_key.is_some_and(|resume| *key <= resume) {
                    continue;
                }
                if entry.wallet_id != wallet_id {
                    continue;
                }
                if page.len() == limit {
                    next = page.last().map(|last| AuditCursor {
                        changed_at: last.changed_at,
                        entry_id: last.id,
                    });
                    break 'scan;
                }
                page.push(entry.clone());
            }
        }

        (page, next)
    }

    /// All entries linked to a transaction, in append order.
    pub fn entries_for_transaction(&self, transaction_id: TransactionId) -> Vec<AuditEntry> {
        let partitions = self.partitions.read();
        partitions
            .values()
            .flat_map(|bucket| bucket.values())
            .filter(|e| e.transaction_id == Some(transaction_id))
            .cloned()
            .collect()
    }

    /// Drop whole day buckets older than `cutoff`. Returns the number of
    /// entries removed.
    pub fn prune_before(&self, cutoff: NaiveDate) -> usize {
        let mut partitions = self.partitions.write();
        let keep = partitions.split_off(&cutoff);
        let removed = partitions.values().map(BTreeMap::len).sum();
        *partitions = keep;
        removed
    }

    /// Total entries currently retained.
    pub fn len(&self) -> usize {
        self.partitions.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_common::Currency;
    use rust_decimal_macros::dec;
    use std::net::{Ipv4Addr, Ipv6Addr};

    async fn logger_with_wallet() -> (AuditLogger, WalletId, UserId) {
        let store = Arc::new(WalletStore::new());
        let owner = UserId::new();
        let wallet = store.open(owner, Currency::Eur).await.unwrap();
        (AuditLogger::new(store), wallet.id, owner)
    }

    fn request(wallet_id: WalletId, old: Decimal, new: Decimal) -> AuditRequest {
        AuditRequest {
            wallet_id,
            old_balance: old,
            new_balance: new,
            operation_type: OperationType::Deposit,
            acting_user: None,
            transaction_id: None,
            origin: None,
            source_system: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_change_amount_is_derived() {
        let (logger, wallet_id, owner) = logger_with_wallet().await;

        let entry = logger
            .append(request(wallet_id, dec!(10.00), dec!(35.50)))
            .unwrap();

        assert_eq!(entry.change_amount, dec!(25.50));
        assert_eq!(entry.acting_user, owner);
    }

    #[tokio::test]
    async fn test_hash_detects_tampering() {
        let (logger, wallet_id, _) = logger_with_wallet().await;

        let mut entry = logger
            .append(request(wallet_id, dec!(0.00), dec!(50.00)))
            .unwrap();
        assert!(AuditLogger::verify_integrity(&entry));

        entry.new_balance = dec!(500.00);
        assert!(!AuditLogger::verify_integrity(&entry));
    }

    #[tokio::test]
    async fn test_list_orders_and_pages() {
        let (logger, wallet_id, _) = logger_with_wallet().await;

        for i in 1..=5u32 {
            let old = Decimal::from(i - 1);
            let new = Decimal::from(i);
            logger.append(request(wallet_id, old, new)).unwrap();
        }

        let from = Utc::now() - chrono::Duration::hours(1);
        let until = Utc::now() + chrono::Duration::hours(1);

        let (first, cursor) = logger.list(wallet_id, from, until, None, 3);
        assert_eq!(first.len(), 3);
        let cursor = cursor.expect("more entries remain");

        let (rest, end) = logger.list(wallet_id, from, until, Some(cursor), 3);
        assert_eq!(rest.len(), 2);
        assert!(end.is_none());

        let all: Vec<_> = first.into_iter().chain(rest).collect();
        assert_eq!(all.len(), 5);
        all.windows(2)
            .for_each(|w| assert!((w[0].changed_at, w[0].id) < (w[1].changed_at, w[1].id)));
    }

    #[tokio::test]
    async fn test_origin_truncation() {
        assert_eq!(
            truncate_ip(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 77))),
            "203.0.113.0/24"
        );
        assert_eq!(
            truncate_ip(IpAddr::V6(Ipv6Addr::new(
                0x2001, 0xdb8, 0xabcd, 0x12, 0xdead, 0xbeef, 0, 1
            ))),
            "2001:db8:abcd:12::/64"
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_hash_reproducible_and_tamper_evident(
                cents in 0i64..1_000_000_000,
                tampered in 0i64..1_000_000_000,
            ) {
                let wallet_id = WalletId::new();
                let at = Utc::now();
                let balance = Decimal::new(cents, 2);

                let hash = compute_hash(wallet_id, balance, at);
                prop_assert_eq!(&compute_hash(wallet_id, balance, at), &hash);

                if tampered != cents {
                    let other = compute_hash(wallet_id, Decimal::new(tampered, 2), at);
                    prop_assert_ne!(&other, &hash);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_negative_balance_rejected() {
        let (logger, wallet_id, _) = logger_with_wallet().await;
        let err = logger
            .append(request(wallet_id, dec!(5.00), dec!(-1.00)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }
}
