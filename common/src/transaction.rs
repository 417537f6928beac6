//! Transaction model and status state machine.

use crate::{
    max_transaction_amount, Currency, LedgerError, MerchantId, Result, TransactionId, WalletId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of money movement a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Refund,
    Chargeback,
    Withdrawal,
    Deposit,
    Transfer,
    FeeCollection,
    Adjustment,
}

impl TransactionType {
    /// Whether this type requires a sender wallet.
    pub fn requires_sender(&self) -> bool {
        matches!(
            self,
            TransactionType::Payment
                | TransactionType::Transfer
                | TransactionType::Withdrawal
                | TransactionType::Chargeback
        )
    }

    /// Whether this type requires a recipient wallet.
    pub fn requires_recipient(&self) -> bool {
        matches!(
            self,
            TransactionType::Deposit
                | TransactionType::Payment
                | TransactionType::Transfer
                | TransactionType::Refund
        )
    }

    /// Whether this type forbids a sender wallet.
    pub fn forbids_sender(&self) -> bool {
        matches!(self, TransactionType::Deposit)
    }

    /// Whether this type forbids a recipient wallet.
    pub fn forbids_recipient(&self) -> bool {
        matches!(self, TransactionType::Withdrawal)
    }
}

/// Instrument through which the transaction was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMethod {
    Card,
    Wallet,
    BankTransfer,
    Subscription,
    Crypto,
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, not yet executed.
    Pending,
    /// Funds authorized but not captured.
    Authorized,
    /// Funds captured, awaiting completion.
    Captured,
    /// Completed successfully (terminal).
    Completed,
    /// Failed (terminal).
    Failed,
    /// Cancelled before execution (terminal).
    Cancelled,
    /// Refunded (terminal).
    Refunded,
    /// Under dispute, outcome pending.
    Disputed,
}

impl TransactionStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Refunded
        )
    }

    /// Get valid next states from the current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Authorized,
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Authorized => &[
                TransactionStatus::Captured,
                TransactionStatus::Cancelled,
                TransactionStatus::Failed,
            ],
            TransactionStatus::Captured => &[
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Disputed,
            ],
            TransactionStatus::Disputed => {
                &[TransactionStatus::Refunded, TransactionStatus::Failed]
            }
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::Cancelled
            | TransactionStatus::Refunded => &[],
        }
    }

    /// Check if transition to the given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// A recorded movement of funds.
///
/// Identity is the (created_at, id) composite so records partition naturally
/// by time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier (time-ordered).
    pub id: TransactionId,
    /// Creation timestamp, part of the composite identity.
    pub created_at: DateTime<Utc>,
    /// Kind of movement.
    pub transaction_type: TransactionType,
    /// Initiating instrument.
    pub method: TransactionMethod,
    /// Sending wallet, if the type has one.
    pub sender_wallet_id: Option<WalletId>,
    /// Receiving wallet, if the type has one.
    pub recipient_wallet_id: Option<WalletId>,
    /// Amount moved, always positive.
    pub amount: Decimal,
    /// Denomination.
    pub currency: Currency,
    /// Current lifecycle state.
    pub status: TransactionStatus,
    /// Flag set when fraud is suspected.
    pub fraud_flag: bool,
    /// Fee charged alongside the movement.
    pub fee_amount: Decimal,
    /// Free-form description.
    pub description: Option<String>,
    /// Technical metadata.
    pub metadata: Option<serde_json::Value>,
    /// Merchant involved, if any.
    pub merchant_id: Option<MerchantId>,
    /// Reason the transaction failed, if it did.
    pub failure_reason: Option<String>,
    /// Stamped on first transition into a terminal status, never changed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a new pending transaction after validating its shape.
    pub fn new(
        transaction_type: TransactionType,
        method: TransactionMethod,
        sender_wallet_id: Option<WalletId>,
        recipient_wallet_id: Option<WalletId>,
        amount: Decimal,
        currency: Currency,
    ) -> Result<Self> {
        validate_amount(amount)?;
        validate_wallet_refs(transaction_type, sender_wallet_id, recipient_wallet_id)?;

        Ok(Self {
            id: TransactionId::new(),
            created_at: Utc::now(),
            transaction_type,
            method,
            sender_wallet_id,
            recipient_wallet_id,
            amount,
            currency,
            status: TransactionStatus::Pending,
            fraud_flag: false,
            fee_amount: Decimal::ZERO,
            description: None,
            metadata: None,
            merchant_id: None,
            failure_reason: None,
            completed_at: None,
        })
    }

    /// Transition to a new status.
    ///
    /// Stamps `completed_at` exactly once, on the first entry into a
    /// terminal status.
    pub fn transition_to(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark the transaction as failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.failure_reason = Some(reason.into());
        self.transition_to(TransactionStatus::Failed)
    }
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation {
            message: "Amount must be positive".to_string(),
            field: Some("amount".to_string()),
        });
    }
    if amount > max_transaction_amount() {
        return Err(LedgerError::Validation {
            message: format!("Amount exceeds ceiling of {}", max_transaction_amount()),
            field: Some("amount".to_string()),
        });
    }
    if amount != amount.round_dp(2) {
        return Err(LedgerError::Validation {
            message: "Amount precision exceeds two decimal places".to_string(),
            field: Some("amount".to_string()),
        });
    }
    Ok(())
}

fn validate_wallet_refs(
    transaction_type: TransactionType,
    sender: Option<WalletId>,
    recipient: Option<WalletId>,
) -> Result<()> {
    if let (Some(s), Some(r)) = (sender, recipient) {
        if s == r {
            return Err(LedgerError::Validation {
                message: "Sender and recipient wallets must differ".to_string(),
                field: Some("recipient_wallet_id".to_string()),
            });
        }
    }

    if sender.is_none() && recipient.is_none() {
        return Err(LedgerError::Validation {
            message: "At least one wallet reference is required".to_string(),
            field: None,
        });
    }
    if transaction_type.requires_sender() && sender.is_none() {
        return Err(LedgerError::Validation {
            message: format!("{:?} requires a sender wallet", transaction_type),
            field: Some("sender_wallet_id".to_string()),
        });
    }
    if transaction_type.requires_recipient() && recipient.is_none() {
        return Err(LedgerError::Validation {
            message: format!("{:?} requires a recipient wallet", transaction_type),
            field: Some("recipient_wallet_id".to_string()),
        });
    }
    if transaction_type.forbids_sender() && sender.is_some() {
        return Err(LedgerError::Validation {
            message: "Deposits have no sender wallet".to_string(),
            field: Some("sender_wallet_id".to_string()),
        });
    }
    if transaction_type.forbids_recipient() && recipient.is_some() {
        return Err(LedgerError::Validation {
            message: "Withdrawals have no recipient wallet".to_string(),
            field: Some("recipient_wallet_id".to_string()),
        });
    }
    Ok(())
}
