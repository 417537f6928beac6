//! Error types for CoreBank operations.

use crate::{JobId, TransactionId, TransactionStatus, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for CoreBank operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or out-of-range input.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Debit exceeds the available balance.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Wallet is frozen or inactive and cannot transact.
    #[error("Wallet not active: {0}")]
    WalletNotActive(WalletId),

    /// Credit would push the balance above its ceiling.
    #[error("Balance ceiling exceeded: ceiling {ceiling}, would be {would_be}")]
    BalanceCeilingExceeded { ceiling: Decimal, would_be: Decimal },

    /// Wallet currency does not match the requested currency.
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    /// Unknown wallet.
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// A second non-deleted wallet for the same (owner, currency) pair.
    #[error("Wallet already exists for owner in {currency}")]
    DuplicateWallet { currency: String },

    /// Unknown transaction.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// A record references a transaction that does not exist.
    #[error("Dangling transaction reference: {0}")]
    TransactionIntegrity(TransactionId),

    /// Invalid lifecycle transition.
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Deactivating the sole active key of a type.
    #[error("Cannot deactivate the last active key of type {key_type}")]
    LastActiveKey { key_type: String },

    /// No active key exists for a type.
    #[error("No active key of type {key_type}")]
    NoActiveKey { key_type: String },

    /// Unknown encryption key.
    #[error("Encryption key not found")]
    KeyNotFound,

    /// Unknown batch job.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Job was cancelled before or during execution.
    #[error("Job cancelled: {0}")]
    JobCancelled(JobId),

    /// A retry budget was exhausted.
    #[error("Retries exhausted after {attempts} attempts: {operation}")]
    RetryExhausted { operation: String, attempts: u32 },

    /// Could not acquire an entity lock in time; safe to retry.
    #[error("Lock contention on wallet {0}")]
    LockContention(WalletId),

    /// Cryptographic failure.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Check if this error is transient and safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockContention(_) | LedgerError::Internal(_)
        )
    }

    /// Get a stable error code for failed-transaction records.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::WalletNotActive(_) => "WALLET_NOT_ACTIVE",
            LedgerError::BalanceCeilingExceeded { .. } => "BALANCE_CEILING_EXCEEDED",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::DuplicateWallet { .. } => "DUPLICATE_WALLET",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::TransactionIntegrity(_) => "TRANSACTION_INTEGRITY",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::LastActiveKey { .. } => "LAST_ACTIVE_KEY",
            LedgerError::NoActiveKey { .. } => "NO_ACTIVE_KEY",
            LedgerError::KeyNotFound => "KEY_NOT_FOUND",
            LedgerError::JobNotFound(_) => "JOB_NOT_FOUND",
            LedgerError::JobCancelled(_) => "JOB_CANCELLED",
            LedgerError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            LedgerError::LockContention(_) => "LOCK_CONTENTION",
            LedgerError::Crypto(_) => "CRYPTO_ERROR",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for CoreBank operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
