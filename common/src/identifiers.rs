//! Identifier types for CoreBank ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, v4) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            uuid_id!(@common $name);
        }

        uuid_id!(@impls $name);
    };
    ($(#[$doc:meta])* $name:ident, v7) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            uuid_id!(@common $name);
        }

        uuid_id!(@impls $name);
    };
    (@common $name:ident) => {
        /// Create from an existing UUID.
        pub fn from_uuid(uuid: Uuid) -> Self {
            Self(uuid)
        }

        /// Parse from string.
        pub fn parse(s: &str) -> Result<Self, uuid::Error> {
            Ok(Self(Uuid::parse_str(s)?))
        }

        /// Get the underlying UUID.
        pub fn as_uuid(&self) -> &Uuid {
            &self.0
        }
    };
    (@impls $name:ident) => {
        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a wallet.
    WalletId,
    v4
);

uuid_id!(
    /// Opaque identifier for a user, supplied by the authentication layer.
    UserId,
    v4
);

uuid_id!(
    /// Unique identifier for a transaction.
    /// Uses UUID v7 so the (created_at, id) composite identity sorts by time.
    TransactionId,
    v7
);

uuid_id!(
    /// Unique identifier for an audit log entry.
    /// Uses UUID v7 for stable time ordering within a partition.
    AuditEntryId,
    v7
);

uuid_id!(
    /// Unique identifier for an encryption key.
    KeyId,
    v4
);

uuid_id!(
    /// Unique identifier for a batch job.
    JobId,
    v4
);

uuid_id!(
    /// Unique identifier for a failed-transaction record.
    FailedTransactionId,
    v4
);

uuid_id!(
    /// Opaque identifier for a merchant involved in a payment.
    MerchantId,
    v4
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_uniqueness() {
        assert_ne!(WalletId::new(), WalletId::new());
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id = WalletId::new();
        let parsed = WalletId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_transaction_ids_are_time_ordered() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert!(a <= b);
    }
}
