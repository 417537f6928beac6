//! Exchange-rate lookup boundary.
//!
//! The ledger itself never converts currencies; callers that need a rate
//! fetch one through this seam so the real provider can live outside the
//! core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use corebank_common::{Currency, LedgerError, Result};

/// Rate source for `(base, target)` pairs at a point in time.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rate(
        &self,
        base: Currency,
        target: Currency,
        as_of: DateTime<Utc>,
    ) -> Result<Decimal>;
}

#[derive(Debug, Clone)]
struct RateEntry {
    base: Currency,
    target: Currency,
    rate: Decimal,
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
}

/// Table-backed provider with validity windows, for tests and for
/// deployments that push rates in from an external feed.
pub struct InMemoryRateProvider {
    entries: RwLock<Vec<RateEntry>>,
}

impl InMemoryRateProvider {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Publish a rate valid from `valid_from`, open-ended or until
    /// `valid_until`.
    pub fn publish(
        &self,
        base: Currency,
        target: Currency,
        rate: Decimal,
        valid_from: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if rate <= Decimal::ZERO {
            return Err(LedgerError::Validation {
                message: "Exchange rate must be positive".to_string(),
                field: Some("rate".to_string()),
            });
        }
        self.entries.write().push(RateEntry {
            base,
            target,
            rate,
            valid_from,
            valid_until,
        });
        Ok(())
    }
}

impl Default for InMemoryRateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for InMemoryRateProvider {
    async fn rate(
        &self,
        base: Currency,
        target: Currency,
        as_of: DateTime<Utc>,
    ) -> Result<Decimal> {
        if base == target {
            return Ok(Decimal::ONE);
        }

        // Most recent window covering the requested instant wins.
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| e.base == base && e.target == target)
            .filter(|e| e.valid_from <= as_of && e.valid_until.map_or(true, |u| as_of < u))
            .max_by_key(|e| e.valid_from)
            .map(|e| e.rate)
            .ok_or(LedgerError::Validation {
                message: format!("No exchange rate for {base}/{target} at {as_of}"),
                field: Some("currency".to_string()),
            })
    }
}
