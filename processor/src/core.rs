//! Service assembly.
//!
//! [`LedgerCore`] wires the component crates together and exposes the
//! operations the API layer calls. It owns the scheduler's background
//! loop and its shutdown signal.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::info;

use corebank_common::{
    Currency, FailedTransactionId, JobId, Result, Transaction, TransactionId, UserId, WalletId,
};
use corebank_crypto::{EncryptionKey, EncryptionKeyManager, KeyAlgorithm, KeyType};
use corebank_ledger::{
    AuditCursor, AuditEntry, AuditLogger, TransactionStore, Wallet, WalletStore,
};
use corebank_scheduler::{BatchJob, BatchJobScheduler, EnqueueRequest, JobHandler};

use crate::config::ProcessorConfig;
use crate::failed::{
    FailedTransaction, FailedTransactionHandler, RecordFailureRequest, ResolutionStatus,
};
use crate::processor::{TransactionProcessor, TransferRequest};
use crate::rates::{InMemoryRateProvider, RateProvider};

/// The assembled ledger service.
pub struct LedgerCore {
    wallets: Arc<WalletStore>,
    transactions: Arc<TransactionStore>,
    audit: Arc<AuditLogger>,
    failed: Arc<FailedTransactionHandler>,
    keys: Arc<EncryptionKeyManager>,
    scheduler: Arc<BatchJobScheduler>,
    processor: TransactionProcessor,
    rates: Arc<dyn RateProvider>,
    shutdown: watch::Sender<bool>,
}

impl LedgerCore {
    /// Assemble the service from configuration and a master key.
    pub fn new(config: ProcessorConfig, master_key: [u8; 32]) -> Self {
        let wallets = Arc::new(WalletStore::new());
        let transactions = Arc::new(TransactionStore::new());
        let audit = Arc::new(AuditLogger::new(wallets.clone()));
        let failed = Arc::new(FailedTransactionHandler::new(transactions.clone()));
        let keys = Arc::new(
            EncryptionKeyManager::new(master_key)
                .with_validity(chrono::Duration::days(config.key_validity_days)),
        );
        let scheduler = Arc::new(BatchJobScheduler::new(
            config.scheduler.worker_count,
            config.scheduler.poll_interval,
        ));
        let processor = TransactionProcessor::new(
            wallets.clone(),
            transactions.clone(),
            audit.clone(),
            failed.clone(),
            config.transfer.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            wallets,
            transactions,
            audit,
            failed,
            keys,
            scheduler,
            processor,
            rates: Arc::new(InMemoryRateProvider::new()),
            shutdown,
        }
    }

    /// Swap in an external exchange-rate source.
    pub fn with_rate_provider(mut self, rates: Arc<dyn RateProvider>) -> Self {
        self.rates = rates;
        self
    }

    /// Start the background scheduler loop.
    pub fn start(&self) {
        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            scheduler.run(shutdown).await;
        });
        info!("Ledger core started");
    }

    /// Signal the background loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        info!("Ledger core stopping");
    }

    /// Register the handler invoked for a job type.
    pub fn register_job_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.scheduler.register_handler(job_type, handler);
    }

    // Wallets

    pub async fn open_wallet(&self, owner: UserId, currency: Currency) -> Result<Wallet> {
        self.wallets.open(owner, currency).await
    }

    pub fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets.get(wallet_id)
    }

    // Transfers

    pub async fn process_transfer(&self, request: TransferRequest) -> Result<Transaction> {
        self.processor.process_transfer(request).await
    }

    pub async fn deposit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        currency: Currency,
        origin: Option<IpAddr>,
    ) -> Result<Transaction> {
        self.processor.deposit(wallet_id, amount, currency, origin).await
    }

    pub async fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        currency: Currency,
        origin: Option<IpAddr>,
    ) -> Result<Transaction> {
        self.processor.withdraw(wallet_id, amount, currency, origin).await
    }

    pub fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.transactions.get(transaction_id)
    }

    // Audit

    pub fn list_audit_log(
        &self,
        wallet_id: WalletId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        cursor: Option<AuditCursor>,
        limit: usize,
    ) -> (Vec<AuditEntry>, Option<AuditCursor>) {
        self.audit.list(wallet_id, from, until, cursor, limit)
    }

    // Failed transactions

    pub fn record_failed_transaction(
        &self,
        request: RecordFailureRequest,
    ) -> Result<FailedTransaction> {
        self.failed.record(request)
    }

    pub fn resolve_failed_transaction(
        &self,
        id: FailedTransactionId,
        next: ResolutionStatus,
        reviewed_by: Option<UserId>,
    ) -> Result<FailedTransaction> {
        self.failed.resolve(id, next, reviewed_by)
    }

    pub fn escalate_failed_transaction(
        &self,
        id: FailedTransactionId,
        reviewed_by: Option<UserId>,
    ) -> Result<FailedTransaction> {
        self.failed.escalate(id, reviewed_by)
    }

    // Batch jobs

    pub fn enqueue_job(&self, request: EnqueueRequest) -> Result<BatchJob> {
        self.scheduler.enqueue(request)
    }

    pub fn get_job_status(&self, job_id: JobId) -> Result<BatchJob> {
        self.scheduler.get(job_id)
    }

    pub fn cancel_job(&self, job_id: JobId) -> Result<BatchJob> {
        self.scheduler.cancel(job_id)
    }

    // Exchange rates

    pub async fn exchange_rate(
        &self,
        base: Currency,
        target: Currency,
        as_of: DateTime<Utc>,
    ) -> Result<Decimal> {
        self.rates.rate(base, target, as_of).await
    }

    // Encryption keys

    pub fn generate_encryption_key(
        &self,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        created_by: Option<UserId>,
    ) -> Result<EncryptionKey> {
        self.keys.generate_key(key_type, algorithm, created_by)
    }

    pub fn get_active_encryption_key(&self, key_type: KeyType) -> Result<EncryptionKey> {
        self.keys.get_active_key(key_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn core() -> LedgerCore {
        LedgerCore::new(ProcessorConfig::default(), [3u8; 32])
    }

    #[tokio::test]
    async fn test_end_to_end_transfer_through_facade() {
        let core = core();
        let owner_a = UserId::new();
        let owner_b = UserId::new();

        let a = core.open_wallet(owner_a, Currency::Eur).await.unwrap();
        let b = core.open_wallet(owner_b, Currency::Eur).await.unwrap();
        core.deposit(a.id, dec!(100.00), Currency::Eur, None)
            .await
            .unwrap();

        let tx = core
            .process_transfer(TransferRequest::new(a.id, b.id, dec!(40.00), Currency::Eur))
            .await
            .unwrap();

        assert_eq!(core.get_wallet(a.id).unwrap().balance, dec!(60.00));
        assert_eq!(core.get_wallet(b.id).unwrap().balance, dec!(40.00));

        let from = Utc::now() - chrono::Duration::hours(1);
        let until = Utc::now() + chrono::Duration::hours(1);
        let (entries, _) = core.list_audit_log(a.id, from, until, None, 10);
        assert!(entries.iter().any(|e| e.transaction_id == Some(tx.id)));
    }

    #[test]
    fn test_key_rotation_through_facade() {
        let core = core();
        let k1 = core
            .generate_encryption_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();
        let k2 = core
            .generate_encryption_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();

        assert_ne!(k1.id, k2.id);
        let active = core.get_active_encryption_key(KeyType::CardData).unwrap();
        assert_eq!(active.id, k2.id);
        assert_eq!(active.version, 2);
    }

    #[tokio::test]
    async fn test_job_lifecycle_through_facade() {
        let core = core();
        let job = core
            .enqueue_job(EnqueueRequest::new(
                "report",
                Utc::now() + chrono::Duration::hours(1),
                serde_json::json!({"month": "2026-08"}),
            ))
            .unwrap();

        assert_eq!(
            core.get_job_status(job.id).unwrap().status,
            corebank_scheduler::JobStatus::Pending
        );

        let cancelled = core.cancel_job(job.id).unwrap();
        assert_eq!(cancelled.status, corebank_scheduler::JobStatus::Cancelled);
    }
}
