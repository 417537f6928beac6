//! CoreBank Ledger
//!
//! Wallet balances with serialized per-wallet mutation, the append-only
//! audit trail, and time-bucketed transaction records.

pub mod wallet;
pub mod store;
pub mod audit;
pub mod transactions;

pub use wallet::{Wallet, WalletStatus};
pub use store::{BalanceUpdate, WalletStore};
pub use audit::{AuditCursor, AuditEntry, AuditLogger, AuditRequest, OperationType};
pub use transactions::TransactionStore;
