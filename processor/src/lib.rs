//! CoreBank Transaction Processor
//!
//! Orchestrates atomic transfers across the wallet store and the audit
//! trail, triages failed transactions, and assembles the full ledger
//! service from its component crates.

pub mod config;
pub mod failed;
pub mod rates;
pub mod processor;
pub mod core;

pub use config::{ProcessorConfig, SchedulerConfig, TransferConfig};
pub use failed::{
    error_code_info, ErrorCategory, ErrorCodeInfo, ErrorSeverity, FailedTransaction,
    FailedTransactionHandler, RecordFailureRequest, ResolutionStatus, MAX_ESCALATION_LEVEL,
};
pub use rates::{InMemoryRateProvider, RateProvider};
pub use processor::{TransactionProcessor, TransferRequest};
pub use core::LedgerCore;
