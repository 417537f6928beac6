//! Failed-transaction triage.
//!
//! Every transfer attempt that does not complete produces a record here,
//! which operators then move through a closed resolution state machine.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use corebank_common::{FailedTransactionId, LedgerError, Result, TransactionId, UserId};
use corebank_ledger::{audit::truncate_ip, TransactionStore};

/// Highest escalation level a record may reach.
pub const MAX_ESCALATION_LEVEL: u8 = 5;

/// Resolution lifecycle of a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Initial state: under automatic or manual investigation.
    Investigating,
    /// Root cause addressed. Terminal.
    Resolved,
    /// Claim rejected. Terminal.
    Denied,
    /// Waiting on a human reviewer.
    PendingReview,
    /// Raised to a higher support tier.
    Escalated,
}

impl ResolutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolutionStatus::Resolved | ResolutionStatus::Denied)
    }

    /// Valid next states from the current state.
    pub fn valid_transitions(&self) -> &[ResolutionStatus] {
        match self {
            ResolutionStatus::Investigating => &[
                ResolutionStatus::Resolved,
                ResolutionStatus::Denied,
                ResolutionStatus::Escalated,
                ResolutionStatus::PendingReview,
            ],
            ResolutionStatus::PendingReview => &[
                ResolutionStatus::Resolved,
                ResolutionStatus::Denied,
                ResolutionStatus::Escalated,
            ],
            // Escalated allows a self-edge: each further escalation raises
            // the level while the status stays put.
            ResolutionStatus::Escalated => &[
                ResolutionStatus::Resolved,
                ResolutionStatus::Denied,
                ResolutionStatus::Escalated,
            ],
            ResolutionStatus::Resolved | ResolutionStatus::Denied => &[],
        }
    }

    pub fn can_transition_to(&self, next: ResolutionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Error gravity for triage prioritization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Broad failure domain for routing to the right team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Funds,
    System,
    Fraud,
    Network,
    Technical,
    Compliance,
    UserInput,
}

/// Catalog entry describing a known error code.
#[derive(Debug, Clone, Copy)]
pub struct ErrorCodeInfo {
    pub code: &'static str,
    pub description: &'static str,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    pub retry_possible: bool,
}

const ERROR_CATALOG: &[ErrorCodeInfo] = &[
    ErrorCodeInfo {
        code: "VALIDATION_ERROR",
        description: "Request failed input validation",
        severity: ErrorSeverity::Low,
        category: ErrorCategory::UserInput,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "INSUFFICIENT_FUNDS",
        description: "Sender balance below the requested amount",
        severity: ErrorSeverity::Medium,
        category: ErrorCategory::Funds,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "WALLET_NOT_ACTIVE",
        description: "A wallet involved is frozen, inactive or deleted",
        severity: ErrorSeverity::Medium,
        category: ErrorCategory::Compliance,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "BALANCE_CEILING_EXCEEDED",
        description: "Credit would push the recipient above its ceiling",
        severity: ErrorSeverity::Medium,
        category: ErrorCategory::Funds,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "CURRENCY_MISMATCH",
        description: "Wallet denominations do not match the request",
        severity: ErrorSeverity::Low,
        category: ErrorCategory::UserInput,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "WALLET_NOT_FOUND",
        description: "A referenced wallet does not exist",
        severity: ErrorSeverity::Medium,
        category: ErrorCategory::UserInput,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "TRANSACTION_INTEGRITY",
        description: "A record references a transaction that does not exist",
        severity: ErrorSeverity::Critical,
        category: ErrorCategory::Technical,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "LOCK_CONTENTION",
        description: "Could not acquire a wallet lock in time",
        severity: ErrorSeverity::Medium,
        category: ErrorCategory::System,
        retry_possible: true,
    },
    ErrorCodeInfo {
        code: "FRAUD_SUSPECTED",
        description: "Anomaly detection flagged the transaction",
        severity: ErrorSeverity::Critical,
        category: ErrorCategory::Fraud,
        retry_possible: false,
    },
    ErrorCodeInfo {
        code: "INTERNAL_ERROR",
        description: "Unexpected internal failure",
        severity: ErrorSeverity::High,
        category: ErrorCategory::Technical,
        retry_possible: true,
    },
];

/// Look up catalog metadata for an error code.
pub fn error_code_info(code: &str) -> Option<&'static ErrorCodeInfo> {
    ERROR_CATALOG.iter().find(|e| e.code == code)
}

/// A transaction processing attempt that did not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTransaction {
    /// Unique record identifier.
    pub id: FailedTransactionId,
    /// Transaction the failure belongs to, when one was created.
    pub transaction_id: Option<TransactionId>,
    /// Stable error code, resolvable through the catalog.
    pub error_code: String,
    /// Free-text reason.
    pub reason: String,
    /// Whether anomaly detection flagged the attempt.
    pub fraud_detected: bool,
    /// Resolution lifecycle state.
    pub resolution_status: ResolutionStatus,
    /// Support tier, 0..=5.
    pub escalation_level: u8,
    /// Anomaly score, non-negative when present.
    pub anomaly_score: Option<f64>,
    /// Automatic retries already attempted before the record was cut.
    pub automatic_retry_attempt: u32,
    /// Operator who last reviewed the record.
    pub reviewed_by: Option<UserId>,
    /// Truncated origin address.
    pub ip_address: Option<String>,
    /// Client user agent, as supplied by the transport layer.
    pub user_agent: Option<String>,
    /// Stamped exactly once, on first entry into resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to [`FailedTransactionHandler::record`].
#[derive(Debug, Clone)]
pub struct RecordFailureRequest {
    pub transaction_id: Option<TransactionId>,
    pub error_code: String,
    pub reason: String,
    pub fraud_detected: bool,
    pub anomaly_score: Option<f64>,
    pub automatic_retry_attempt: u32,
    pub origin: Option<IpAddr>,
    pub user_agent: Option<String>,
}

impl RecordFailureRequest {
    pub fn new(error_code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            transaction_id: None,
            error_code: error_code.into(),
            reason: reason.into(),
            fraud_detected: false,
            anomaly_score: None,
            automatic_retry_attempt: 0,
            origin: None,
            user_agent: None,
        }
    }

    pub fn with_transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_fraud(mut self, anomaly_score: f64) -> Self {
        self.fraud_detected = true;
        self.anomaly_score = Some(anomaly_score);
        self
    }
}

/// Owns failed-transaction records and their resolution lifecycle.
pub struct FailedTransactionHandler {
    transactions: Arc<TransactionStore>,
    records: DashMap<FailedTransactionId, FailedTransaction>,
    by_transaction: DashMap<TransactionId, Vec<FailedTransactionId>>,
}

impl FailedTransactionHandler {
    pub fn new(transactions: Arc<TransactionStore>) -> Self {
        Self {
            transactions,
            records: DashMap::new(),
            by_transaction: DashMap::new(),
        }
    }

    /// Record a failure. A dangling transaction reference aborts the whole
    /// write; failures must never point at transactions that do not exist.
    #[instrument(skip(self, request), fields(error_code = %request.error_code))]
    pub fn record(&self, request: RecordFailureRequest) -> Result<FailedTransaction> {
        if let Some(tx_id) = request.transaction_id {
            if !self.transactions.exists(tx_id) {
                return Err(LedgerError::TransactionIntegrity(tx_id));
            }
        }
        if request.anomaly_score.is_some_and(|s| s < 0.0) {
            return Err(LedgerError::Validation {
                message: "Anomaly score cannot be negative".to_string(),
                field: Some("anomaly_score".to_string()),
            });
        }

        let now = Utc::now();
        let record = FailedTransaction {
            id: FailedTransactionId::new(),
            transaction_id: request.transaction_id,
            error_code: request.error_code,
            reason: request.reason,
            fraud_detected: request.fraud_detected,
            resolution_status: ResolutionStatus::Investigating,
            escalation_level: 0,
            anomaly_score: request.anomaly_score,
            automatic_retry_attempt: request.automatic_retry_attempt,
            reviewed_by: None,
            ip_address: request.origin.map(truncate_ip),
            user_agent: request.user_agent,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Some(tx_id) = record.transaction_id {
            self.by_transaction.entry(tx_id).or_default().push(record.id);
        }
        self.records.insert(record.id, record.clone());

        if record.fraud_detected {
            warn!(
                record_id = %record.id,
                anomaly_score = ?record.anomaly_score,
                "Failed transaction recorded with fraud flag"
            );
        } else {
            info!(record_id = %record.id, error_code = %record.error_code, "Failed transaction recorded");
        }
        Ok(record)
    }

    /// Get a record by id.
    pub fn get(&self, id: FailedTransactionId) -> Result<FailedTransaction> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or(LedgerError::Internal(format!(
                "Failed transaction record not found: {id}"
            )))
    }

    /// Records cut for a given transaction.
    pub fn records_for_transaction(&self, transaction_id: TransactionId) -> Vec<FailedTransaction> {
        self.by_transaction
            .get(&transaction_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.records.get(id))
                    .map(|r| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move a record through its resolution state machine.
    ///
    /// `resolved_at` is stamped exactly once, on the first entry into
    /// resolved.
    #[instrument(skip(self))]
    pub fn resolve(
        &self,
        id: FailedTransactionId,
        next: ResolutionStatus,
        reviewed_by: Option<UserId>,
    ) -> Result<FailedTransaction> {
        let mut record = self.records.get_mut(&id).ok_or(LedgerError::Internal(
            format!("Failed transaction record not found: {id}"),
        ))?;

        if !record.resolution_status.can_transition_to(next) {
            return Err(LedgerError::Validation {
                message: format!(
                    "Cannot move from {:?} to {:?}",
                    record.resolution_status, next
                ),
                field: Some("resolution_status".to_string()),
            });
        }

        record.resolution_status = next;
        if next == ResolutionStatus::Resolved && record.resolved_at.is_none() {
            record.resolved_at = Some(Utc::now());
        }
        if reviewed_by.is_some() {
            record.reviewed_by = reviewed_by;
        }
        record.updated_at = Utc::now();

        info!(record_id = %id, status = ?next, "Failed transaction resolution updated");
        Ok(record.clone())
    }

    /// Raise a record one escalation level and mark it escalated.
    ///
    /// Exceeding the top level is rejected, never silently clamped.
    #[instrument(skip(self))]
    pub fn escalate(
        &self,
        id: FailedTransactionId,
        reviewed_by: Option<UserId>,
    ) -> Result<FailedTransaction> {
        let mut record = self.records.get_mut(&id).ok_or(LedgerError::Internal(
            format!("Failed transaction record not found: {id}"),
        ))?;

        if !record
            .resolution_status
            .can_transition_to(ResolutionStatus::Escalated)
        {
            return Err(LedgerError::Validation {
                message: format!(
                    "Cannot escalate a {:?} record",
                    record.resolution_status
                ),
                field: Some("resolution_status".to_string()),
            });
        }
        if record.escalation_level >= MAX_ESCALATION_LEVEL {
            return Err(LedgerError::Validation {
                message: format!("Escalation level is already at {MAX_ESCALATION_LEVEL}"),
                field: Some("escalation_level".to_string()),
            });
        }

        record.escalation_level += 1;
        record.resolution_status = ResolutionStatus::Escalated;
        if reviewed_by.is_some() {
            record.reviewed_by = reviewed_by;
        }
        record.updated_at = Utc::now();

        warn!(
            record_id = %id,
            escalation_level = record.escalation_level,
            "Failed transaction escalated"
        );
        Ok(record.clone())
    }

    /// All records still awaiting a terminal resolution.
    pub fn unresolved(&self) -> Vec<FailedTransaction> {
        self.records
            .iter()
            .filter(|r| !r.resolution_status.is_terminal())
            .map(|r| r.clone())
            .collect()
    }
}
