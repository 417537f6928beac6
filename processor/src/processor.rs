//! Atomic transfer orchestration.
//!
//! A transfer spans two wallets and the audit trail. Locks are taken in
//! ascending wallet-id order so opposing transfers over the same pair can
//! never deadlock, every check runs before the first mutation, and a
//! mid-flight failure re-credits the sender before surfacing.

use std::net::IpAddr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use corebank_common::{
    LedgerError, MerchantId, Result, Transaction, TransactionMethod, TransactionStatus,
    TransactionType, UserId, WalletId,
};
use corebank_ledger::{
    AuditLogger, AuditRequest, BalanceUpdate, OperationType, TransactionStore, WalletStore,
};

use crate::config::TransferConfig;
use crate::failed::{FailedTransactionHandler, RecordFailureRequest};

/// Input to [`TransactionProcessor::process_transfer`].
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender: WalletId,
    pub recipient: WalletId,
    pub amount: Decimal,
    pub currency: corebank_common::Currency,
    pub description: Option<String>,
    pub merchant_id: Option<MerchantId>,
    /// Fee charged to the sender on top of the amount.
    pub fee_amount: Decimal,
    /// Acting user; resolved from the wallet owner when absent.
    pub acting_user: Option<UserId>,
    pub origin: Option<IpAddr>,
}

impl TransferRequest {
    pub fn new(
        sender: WalletId,
        recipient: WalletId,
        amount: Decimal,
        currency: corebank_common::Currency,
    ) -> Self {
        Self {
            sender,
            recipient,
            amount,
            currency,
            description: None,
            merchant_id: None,
            fee_amount: Decimal::ZERO,
            acting_user: None,
            origin: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_merchant(mut self, merchant_id: MerchantId) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn with_fee(mut self, fee_amount: Decimal) -> Self {
        self.fee_amount = fee_amount;
        self
    }
}

/// Orchestrates transfers, deposits and withdrawals as atomic units over
/// the wallet store and the audit trail.
pub struct TransactionProcessor {
    wallets: Arc<WalletStore>,
    transactions: Arc<TransactionStore>,
    audit: Arc<AuditLogger>,
    failed: Arc<FailedTransactionHandler>,
    config: TransferConfig,
}

impl TransactionProcessor {
    pub fn new(
        wallets: Arc<WalletStore>,
        transactions: Arc<TransactionStore>,
        audit: Arc<AuditLogger>,
        failed: Arc<FailedTransactionHandler>,
        config: TransferConfig,
    ) -> Self {
        Self {
            wallets,
            transactions,
            audit,
            failed,
            config,
        }
    }

    /// Move funds between two wallets.
    ///
    /// Either every effect lands (both balance changes, one audit entry per
    /// leg, the completed status) or none does. Every failing attempt,
    /// whatever the cause, leaves a failed-transaction record behind.
    #[instrument(skip(self, request), fields(sender = %request.sender, recipient = %request.recipient, amount = %request.amount))]
    pub async fn process_transfer(&self, request: TransferRequest) -> Result<Transaction> {
        if request.fee_amount < Decimal::ZERO
            || request.fee_amount != request.fee_amount.round_dp(2)
        {
            let err = LedgerError::Validation {
                message: "Fee must be non-negative with at most two decimal places".to_string(),
                field: Some("fee_amount".to_string()),
            };
            self.record_failure(None, &err, 0, request.origin);
            return Err(err);
        }

        let mut tx = match Transaction::new(
            TransactionType::Transfer,
            TransactionMethod::Wallet,
            Some(request.sender),
            Some(request.recipient),
            request.amount,
            request.currency,
        ) {
            Ok(tx) => tx,
            Err(e) => {
                // No transaction exists yet; the failure record stands alone.
                self.record_failure(None, &e, 0, request.origin);
                return Err(e);
            }
        };
        tx.description = request.description.clone();
        tx.merchant_id = request.merchant_id;
        tx.fee_amount = request.fee_amount;
        self.transactions.insert(tx.clone());

        let mut attempts: u32 = 0;
        let outcome = loop {
            match self.execute_transfer(&tx, &request).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_retryable() && attempts < self.config.max_lock_retries => {
                    attempts += 1;
                    warn!(
                        transaction_id = %tx.id,
                        attempt = attempts,
                        error = %e,
                        "Transfer attempt hit transient failure; retrying"
                    );
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(()) => {
                let completed = self
                    .transactions
                    .update(tx.id, |t| t.transition_to(TransactionStatus::Completed))?;
                info!(transaction_id = %tx.id, "Transfer completed");
                Ok(completed)
            }
            Err(e) => {
                self.fail_transaction(tx.id, &e, attempts, request.origin);
                Err(e)
            }
        }
    }

    /// One transfer attempt under both wallet locks.
    async fn execute_transfer(&self, tx: &Transaction, request: &TransferRequest) -> Result<()> {
        // Fixed total order: ascending wallet id.
        let (first, second) = if request.sender < request.recipient {
            (request.sender, request.recipient)
        } else {
            (request.recipient, request.sender)
        };

        let first_lock = self.wallets.mutation_lock(first)?;
        let second_lock = self.wallets.mutation_lock(second)?;

        let _first_guard = timeout(self.config.lock_timeout, first_lock.lock_owned())
            .await
            .map_err(|_| LedgerError::LockContention(first))?;
        let _second_guard = timeout(self.config.lock_timeout, second_lock.lock_owned())
            .await
            .map_err(|_| LedgerError::LockContention(second))?;

        // Validate everything before the first mutation.
        let sender = self.wallets.get(request.sender)?;
        let recipient = self.wallets.get(request.recipient)?;

        for wallet in [&sender, &recipient] {
            if !wallet.can_transact() {
                return Err(LedgerError::WalletNotActive(wallet.id));
            }
            if wallet.currency != request.currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: request.currency.code().to_string(),
                    actual: wallet.currency.code().to_string(),
                });
            }
        }

        let total_debit = request.amount + request.fee_amount;
        if sender.balance < total_debit {
            return Err(LedgerError::InsufficientFunds {
                required: total_debit,
                available: sender.balance,
            });
        }
        let recipient_would_be = recipient.balance + request.amount;
        if recipient_would_be > recipient.max_balance {
            return Err(LedgerError::BalanceCeilingExceeded {
                ceiling: recipient.max_balance,
                would_be: recipient_would_be,
            });
        }

        let debit = self.wallets.debit_held(request.sender, request.amount)?;

        let fee_debit = if request.fee_amount > Decimal::ZERO {
            match self.wallets.debit_held(request.sender, request.fee_amount) {
                Ok(update) => Some(update),
                Err(e) => {
                    self.compensate(request.sender, request.amount);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let credit = match self.wallets.credit_held(request.recipient, request.amount) {
            Ok(update) => update,
            Err(e) => {
                self.compensate(request.sender, total_debit);
                return Err(e);
            }
        };

        // Both legs are written under the locks, so they are never observed
        // independently. A failed append reverses both legs before the error
        // surfaces, keeping balances at their pre-transfer values.
        if let Err(e) = self.append_transfer_audit(tx, request, &debit, fee_debit.as_ref(), &credit)
        {
            self.compensate(request.sender, total_debit);
            self.reverse_credit(request.recipient, request.amount);
            return Err(e);
        }

        Ok(())
    }

    fn append_transfer_audit(
        &self,
        tx: &Transaction,
        request: &TransferRequest,
        debit: &BalanceUpdate,
        fee_debit: Option<&BalanceUpdate>,
        credit: &BalanceUpdate,
    ) -> Result<()> {
        self.audit.append(AuditRequest {
            wallet_id: debit.wallet_id,
            old_balance: debit.old_balance,
            new_balance: debit.new_balance,
            operation_type: OperationType::Transfer,
            acting_user: request.acting_user,
            transaction_id: Some(tx.id),
            origin: request.origin,
            source_system: None,
            notes: None,
        })?;
        if let Some(fee) = fee_debit {
            self.audit.append(AuditRequest {
                wallet_id: fee.wallet_id,
                old_balance: fee.old_balance,
                new_balance: fee.new_balance,
                operation_type: OperationType::Fee,
                acting_user: request.acting_user,
                transaction_id: Some(tx.id),
                origin: request.origin,
                source_system: None,
                notes: None,
            })?;
        }
        self.audit.append(AuditRequest {
            wallet_id: credit.wallet_id,
            old_balance: credit.old_balance,
            new_balance: credit.new_balance,
            operation_type: OperationType::Transfer,
            acting_user: request.acting_user,
            transaction_id: Some(tx.id),
            origin: request.origin,
            source_system: None,
            notes: None,
        })?;
        Ok(())
    }

    /// Credit funds into a wallet from outside the ledger.
    #[instrument(skip(self), fields(wallet_id = %wallet_id, amount = %amount))]
    pub async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        currency: corebank_common::Currency,
        origin: Option<IpAddr>,
    ) -> Result<Transaction> {
        let tx = match Transaction::new(
            TransactionType::Deposit,
            TransactionMethod::BankTransfer,
            None,
            Some(wallet_id),
            amount,
            currency,
        ) {
            Ok(tx) => tx,
            Err(e) => {
                self.record_failure(None, &e, 0, origin);
                return Err(e);
            }
        };
        self.transactions.insert(tx.clone());

        let outcome = self
            .single_leg(wallet_id, amount, currency, tx.id, OperationType::Deposit, origin)
            .await;

        match outcome {
            Ok(()) => Ok(self
                .transactions
                .update(tx.id, |t| t.transition_to(TransactionStatus::Completed))?),
            Err(e) => {
                self.fail_transaction(tx.id, &e, 0, origin);
                Err(e)
            }
        }
    }

    /// Debit funds out of a wallet to the outside world.
    #[instrument(skip(self), fields(wallet_id = %wallet_id, amount = %amount))]
    pub async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        currency: corebank_common::Currency,
        origin: Option<IpAddr>,
    ) -> Result<Transaction> {
        let tx = match Transaction::new(
            TransactionType::Withdrawal,
            TransactionMethod::BankTransfer,
            Some(wallet_id),
            None,
            amount,
            currency,
        ) {
            Ok(tx) => tx,
            Err(e) => {
                self.record_failure(None, &e, 0, origin);
                return Err(e);
            }
        };
        self.transactions.insert(tx.clone());

        let outcome = self
            .single_leg(
                wallet_id,
                amount,
                currency,
                tx.id,
                OperationType::Withdrawal,
                origin,
            )
            .await;

        match outcome {
            Ok(()) => Ok(self
                .transactions
                .update(tx.id, |t| t.transition_to(TransactionStatus::Completed))?),
            Err(e) => {
                self.fail_transaction(tx.id, &e, 0, origin);
                Err(e)
            }
        }
    }

    async fn single_leg(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        currency: corebank_common::Currency,
        tx_id: corebank_common::TransactionId,
        operation: OperationType,
        origin: Option<IpAddr>,
    ) -> Result<()> {
        let lock = self.wallets.mutation_lock(wallet_id)?;
        let _guard = timeout(self.config.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| LedgerError::LockContention(wallet_id))?;

        let wallet = self.wallets.get(wallet_id)?;
        if wallet.currency != currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: currency.code().to_string(),
                actual: wallet.currency.code().to_string(),
            });
        }

        let update = match operation {
            OperationType::Deposit => self.wallets.credit_held(wallet_id, amount)?,
            _ => self.wallets.debit_held(wallet_id, amount)?,
        };

        self.audit.append(AuditRequest {
            wallet_id: update.wallet_id,
            old_balance: update.old_balance,
            new_balance: update.new_balance,
            operation_type: operation,
            acting_user: None,
            transaction_id: Some(tx_id),
            origin,
            source_system: None,
            notes: None,
        })?;
        Ok(())
    }

    /// Undo a sender debit after a later step failed. Runs while the
    /// wallet locks are still held.
    fn compensate(&self, sender: WalletId, amount: Decimal) {
        if let Err(e) = self.wallets.credit_held(sender, amount) {
            // The funds were just debited, so this only fires if the wallet
            // was mutated outside its lock. Worth a loud signal.
            error!(
                wallet_id = %sender,
                amount = %amount,
                error = %e,
                "Compensation credit failed; sender balance is short"
            );
        }
    }

    /// Undo a recipient credit after a later step failed. Runs while the
    /// wallet locks are still held.
    fn reverse_credit(&self, recipient: WalletId, amount: Decimal) {
        if let Err(e) = self.wallets.debit_held(recipient, amount) {
            error!(
                wallet_id = %recipient,
                amount = %amount,
                error = %e,
                "Reversal debit failed; recipient balance is over"
            );
        }
    }

    fn fail_transaction(
        &self,
        tx_id: corebank_common::TransactionId,
        error: &LedgerError,
        attempts: u32,
        origin: Option<IpAddr>,
    ) {
        if let Err(e) = self
            .transactions
            .update(tx_id, |t| t.fail(error.to_string()))
        {
            error!(transaction_id = %tx_id, error = %e, "Could not mark transaction failed");
        }
        self.record_failure(Some(tx_id), error, attempts, origin);
    }

    fn record_failure(
        &self,
        tx_id: Option<corebank_common::TransactionId>,
        error: &LedgerError,
        attempts: u32,
        origin: Option<IpAddr>,
    ) {
        let mut request = RecordFailureRequest::new(error.error_code(), error.to_string());
        request.transaction_id = tx_id;
        request.automatic_retry_attempt = attempts;
        request.origin = origin;

        if let Err(e) = self.failed.record(request) {
            error!(error = %e, "Could not record failed transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_common::Currency;
    use rust_decimal_macros::dec;

    struct Fixture {
        wallets: Arc<WalletStore>,
        transactions: Arc<TransactionStore>,
        audit: Arc<AuditLogger>,
        failed: Arc<FailedTransactionHandler>,
        processor: TransactionProcessor,
    }

    fn fixture() -> Fixture {
        let wallets = Arc::new(WalletStore::new());
        let transactions = Arc::new(TransactionStore::new());
        let audit = Arc::new(AuditLogger::new(wallets.clone()));
        let failed = Arc::new(FailedTransactionHandler::new(transactions.clone()));
        let processor = TransactionProcessor::new(
            wallets.clone(),
            transactions.clone(),
            audit.clone(),
            failed.clone(),
            TransferConfig::default(),
        );
        Fixture {
            wallets,
            transactions,
            audit,
            failed,
            processor,
        }
    }

    async fn wallet_with(fx: &Fixture, currency: Currency, balance: Decimal) -> WalletId {
        let wallet = fx.wallets.open(UserId::new(), currency).await.unwrap();
        if balance > Decimal::ZERO {
            fx.wallets.credit(wallet.id, balance).await.unwrap();
        }
        wallet.id
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_audits_both_legs() {
        let fx = fixture();
        let sender = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let recipient = wallet_with(&fx, Currency::Eur, dec!(0.00)).await;

        let tx = fx
            .processor
            .process_transfer(TransferRequest::new(
                sender,
                recipient,
                dec!(40.00),
                Currency::Eur,
            ))
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(tx.completed_at.is_some());
        assert_eq!(fx.wallets.balance(sender).unwrap().value, dec!(60.00));
        assert_eq!(fx.wallets.balance(recipient).unwrap().value, dec!(40.00));

        let entries = fx.audit.entries_for_transaction(tx.id);
        assert_eq!(entries.len(), 2);
        let sum: Decimal = entries.iter().map(|e| e.change_amount).sum();
        assert_eq!(sum, Decimal::ZERO);
        assert!(entries.iter().all(|e| e.change_amount.abs() == dec!(40.00)));
    }

    #[tokio::test]
    async fn test_audit_append_failure_reverses_both_legs() {
        // An audit trail resolving acting users against a detached wallet
        // store fails its appends only after both balances have moved.
        let wallets = Arc::new(WalletStore::new());
        let transactions = Arc::new(TransactionStore::new());
        let audit = Arc::new(AuditLogger::new(Arc::new(WalletStore::new())));
        let failed = Arc::new(FailedTransactionHandler::new(transactions.clone()));
        let processor = TransactionProcessor::new(
            wallets.clone(),
            transactions.clone(),
            audit.clone(),
            failed,
            TransferConfig::default(),
        );

        let sender = wallets.open(UserId::new(), Currency::Eur).await.unwrap().id;
        let recipient = wallets.open(UserId::new(), Currency::Eur).await.unwrap().id;
        wallets.credit(sender, dec!(100.00)).await.unwrap();

        let err = processor
            .process_transfer(TransferRequest::new(
                sender,
                recipient,
                dec!(40.00),
                Currency::Eur,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotFound(_)));

        assert_eq!(wallets.balance(sender).unwrap().value, dec!(100.00));
        assert_eq!(wallets.balance(recipient).unwrap().value, dec!(0.00));
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_a_failure_record() {
        let fx = fixture();
        let sender = wallet_with(&fx, Currency::Eur, dec!(10.00)).await;
        let recipient = wallet_with(&fx, Currency::Eur, dec!(0.00)).await;

        let err = fx
            .processor
            .process_transfer(TransferRequest::new(
                sender,
                recipient,
                dec!(40.00),
                Currency::Eur,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        assert_eq!(fx.wallets.balance(sender).unwrap().value, dec!(10.00));
        assert_eq!(fx.wallets.balance(recipient).unwrap().value, dec!(0.00));

        let from = chrono::Utc::now() - chrono::Duration::hours(1);
        let until = chrono::Utc::now() + chrono::Duration::hours(1);
        let failed_tx = fx
            .transactions
            .list_range(from, until)
            .into_iter()
            .find(|t| t.status == TransactionStatus::Failed)
            .expect("transaction marked failed");
        assert!(failed_tx.failure_reason.is_some());

        let records = fx.failed.records_for_transaction(failed_tx.id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_code, "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected_before_mutation() {
        let fx = fixture();
        let sender = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let recipient = wallet_with(&fx, Currency::Usd, dec!(0.00)).await;

        let err = fx
            .processor
            .process_transfer(TransferRequest::new(
                sender,
                recipient,
                dec!(40.00),
                Currency::Eur,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));

        assert_eq!(fx.wallets.balance(sender).unwrap().value, dec!(100.00));
        assert_eq!(fx.wallets.balance(recipient).unwrap().value, dec!(0.00));
        assert!(fx.audit.is_empty());
    }

    #[tokio::test]
    async fn test_frozen_recipient_blocks_transfer() {
        let fx = fixture();
        let sender = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let recipient = wallet_with(&fx, Currency::Eur, dec!(0.00)).await;
        fx.wallets
            .set_status(recipient, corebank_ledger::WalletStatus::Frozen)
            .await
            .unwrap();

        let err = fx
            .processor
            .process_transfer(TransferRequest::new(
                sender,
                recipient,
                dec!(40.00),
                Currency::Eur,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletNotActive(_)));
        assert_eq!(fx.wallets.balance(sender).unwrap().value, dec!(100.00));
    }

    #[tokio::test]
    async fn test_recipient_ceiling_blocks_transfer() {
        let fx = fixture();
        let sender = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let recipient = wallet_with(&fx, Currency::Eur, dec!(0.00)).await;
        fx.wallets
            .set_max_balance(recipient, dec!(30.00))
            .await
            .unwrap();

        let err = fx
            .processor
            .process_transfer(TransferRequest::new(
                sender,
                recipient,
                dec!(40.00),
                Currency::Eur,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BalanceCeilingExceeded { .. }));
        assert_eq!(fx.wallets.balance(sender).unwrap().value, dec!(100.00));
    }

    #[tokio::test]
    async fn test_fee_leg_is_audited_separately() {
        let fx = fixture();
        let sender = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let recipient = wallet_with(&fx, Currency::Eur, dec!(0.00)).await;

        let tx = fx
            .processor
            .process_transfer(
                TransferRequest::new(sender, recipient, dec!(40.00), Currency::Eur)
                    .with_fee(dec!(1.50)),
            )
            .await
            .unwrap();

        assert_eq!(fx.wallets.balance(sender).unwrap().value, dec!(58.50));
        assert_eq!(fx.wallets.balance(recipient).unwrap().value, dec!(40.00));

        let entries = fx.audit.entries_for_transaction(tx.id);
        assert_eq!(entries.len(), 3);
        let fee_entries: Vec<_> = entries
            .iter()
            .filter(|e| e.operation_type == OperationType::Fee)
            .collect();
        assert_eq!(fee_entries.len(), 1);
        assert_eq!(fee_entries[0].change_amount, dec!(-1.50));
    }

    #[tokio::test]
    async fn test_deposit_and_withdraw() {
        let fx = fixture();
        let wallet = wallet_with(&fx, Currency::Eur, dec!(0.00)).await;

        let deposit = fx
            .processor
            .deposit(wallet, dec!(75.00), Currency::Eur, None)
            .await
            .unwrap();
        assert_eq!(deposit.status, TransactionStatus::Completed);
        assert_eq!(fx.wallets.balance(wallet).unwrap().value, dec!(75.00));

        let withdrawal = fx
            .processor
            .withdraw(wallet, dec!(25.00), Currency::Eur, None)
            .await
            .unwrap();
        assert_eq!(withdrawal.status, TransactionStatus::Completed);
        assert_eq!(fx.wallets.balance(wallet).unwrap().value, dec!(50.00));

        let deposit_entries = fx.audit.entries_for_transaction(deposit.id);
        assert_eq!(deposit_entries.len(), 1);
        assert_eq!(deposit_entries[0].operation_type, OperationType::Deposit);
    }

    #[tokio::test]
    async fn test_transfers_conserve_total_balance() {
        let fx = fixture();
        let a = wallet_with(&fx, Currency::Eur, dec!(300.00)).await;
        let b = wallet_with(&fx, Currency::Eur, dec!(200.00)).await;
        let c = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let total = fx.wallets.total_balance(Currency::Eur);

        let pairs = [(a, b), (b, c), (c, a), (a, c), (b, a)];
        for (i, (from, to)) in pairs.iter().enumerate() {
            let amount = Decimal::from((i as u32 + 1) * 7);
            // Some of these may fail on funds; conservation must hold anyway.
            let _ = fx
                .processor
                .process_transfer(TransferRequest::new(*from, *to, amount, Currency::Eur))
                .await;
        }

        assert_eq!(fx.wallets.total_balance(Currency::Eur), total);
    }

    #[tokio::test]
    async fn test_opposing_concurrent_transfers_do_not_deadlock() {
        let fx = fixture();
        let a = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;
        let b = wallet_with(&fx, Currency::Eur, dec!(100.00)).await;

        let processor = Arc::new(fx.processor);
        let mut handles = Vec::new();
        for i in 0..10 {
            let processor = processor.clone();
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            handles.push(tokio::spawn(async move {
                processor
                    .process_transfer(TransferRequest::new(from, to, dec!(5.00), Currency::Eur))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fx.wallets.total_balance(Currency::Eur), dec!(200.00));
    }
}
