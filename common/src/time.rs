//! Time utilities for the CoreBank ledger.

use chrono::{DateTime, Duration, Utc};

/// A timestamp with timezone (always UTC for CoreBank).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp has expired (is in the past).
pub fn is_expired(expiry: Timestamp) -> bool {
    now() > expiry
}

/// Calculate expiry time from now.
pub fn expires_in(duration: Duration) -> Timestamp {
    now() + duration
}

/// Ledger timing constants.
pub mod constants {
    use super::Duration;

    /// How long a generated encryption key remains valid.
    pub fn key_validity_period() -> Duration {
        Duration::days(90)
    }

    /// Base delay for batch job retry backoff.
    pub fn retry_backoff_base() -> Duration {
        Duration::seconds(30)
    }

    /// Ceiling for batch job retry backoff.
    pub fn retry_backoff_max() -> Duration {
        Duration::hours(6)
    }

    /// Per-wallet lock acquisition timeout inside a transfer.
    pub fn wallet_lock_timeout() -> Duration {
        Duration::seconds(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expired() {
        let past = now() - Duration::seconds(10);
        assert!(is_expired(past));

        let future = now() + Duration::seconds(10);
        assert!(!is_expired(future));
    }

    #[test]
    fn test_expires_in() {
        let expiry = expires_in(Duration::seconds(30));
        assert!(expiry > now());
    }
}
