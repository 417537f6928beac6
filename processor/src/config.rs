//! Processor configuration.

use std::time::Duration;

/// Transfer execution configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for a single wallet lock.
    pub lock_timeout: Duration,
    /// Internal retries when a transfer hits transient contention.
    pub max_lock_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_lock_retries: 3,
        }
    }
}

/// Batch scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bound on concurrently running job handlers.
    pub worker_count: usize,
    /// Dispatch loop polling interval.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Main processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Transfer execution settings.
    pub transfer: TransferConfig,
    /// Batch scheduler settings.
    pub scheduler: SchedulerConfig,
    /// How long generated encryption keys stay valid.
    pub key_validity_days: i64,
    /// Days of audit/transaction history to retain.
    pub retention_days: i64,
    /// Log level.
    pub log_level: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            scheduler: SchedulerConfig::default(),
            key_validity_days: 90,
            retention_days: 3650,
            log_level: "info".to_string(),
        }
    }
}

impl ProcessorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("COREBANK_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.transfer.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(retries) = std::env::var("COREBANK_MAX_LOCK_RETRIES") {
            if let Ok(retries) = retries.parse() {
                config.transfer.max_lock_retries = retries;
            }
        }

        if let Ok(workers) = std::env::var("COREBANK_WORKER_COUNT") {
            if let Ok(workers) = workers.parse() {
                config.scheduler.worker_count = workers;
            }
        }

        if let Ok(interval) = std::env::var("COREBANK_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                config.scheduler.poll_interval = Duration::from_millis(ms);
            }
        }

        if let Ok(days) = std::env::var("COREBANK_KEY_VALIDITY_DAYS") {
            if let Ok(days) = days.parse() {
                config.key_validity_days = days;
            }
        }

        if let Ok(days) = std::env::var("COREBANK_RETENTION_DAYS") {
            if let Ok(days) = days.parse() {
                config.retention_days = days;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.transfer.lock_timeout.is_zero() {
            return Err("Lock timeout cannot be zero".to_string());
        }
        if self.scheduler.worker_count == 0 {
            return Err("Worker count cannot be zero".to_string());
        }
        if self.scheduler.poll_interval.is_zero() {
            return Err("Poll interval cannot be zero".to_string());
        }
        if self.key_validity_days <= 0 {
            return Err("Key validity must be at least one day".to_string());
        }
        if self.retention_days <= 0 {
            return Err("Retention must be at least one day".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProcessorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ProcessorConfig::default();
        config.scheduler.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::default();
        config.key_validity_days = 0;
        assert!(config.validate().is_err());
    }
}
