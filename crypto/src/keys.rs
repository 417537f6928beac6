//! Encryption key lifecycle management.
//!
//! Invariant: exactly one active key per key type. Generating a key
//! activates it and deactivates every sibling of the same type within the
//! same critical section; the sole active key of a type can never be
//! deactivated directly.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use corebank_common::{KeyId, LedgerError, Result, UserId};

use crate::encryption::{decrypt, encrypt, EncryptedPayload};
use crate::hash::sha256_hex;

/// Category of data a key protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    CardData,
    PersonalData,
    Documents,
    TransactionDetails,
}

impl KeyType {
    /// Stable label, used as AAD when sealing key material.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::CardData => "card_data",
            KeyType::PersonalData => "personal_data",
            KeyType::Documents => "documents",
            KeyType::TransactionDetails => "transaction_details",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cipher the key is intended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    Aes256Gcm,
    Rsa4096,
    Chacha20Poly1305,
}

/// Where the key secret lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStorage {
    Database,
    KmsExternal,
    Hsm,
}

/// A managed encryption key.
///
/// Key material is stored sealed under the manager's master key; the
/// fingerprint is computed once at creation over the sealed form and is
/// read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Unique key identifier.
    pub id: KeyId,
    /// Sealed key material.
    pub material: EncryptedPayload,
    /// Intended cipher.
    pub algorithm: KeyAlgorithm,
    /// Category of data this key protects.
    pub key_type: KeyType,
    /// Version, strictly increasing per key type.
    pub version: u32,
    /// Whether this is the active key of its type.
    pub active: bool,
    /// Where the secret lives.
    pub storage: KeyStorage,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
    /// Set when the key was rotated out.
    pub rotated_at: Option<DateTime<Utc>>,
    /// Hard expiry, always after `created_at`.
    pub expires_at: DateTime<Utc>,
    /// Last time the key was handed out for use.
    pub last_used_at: Option<DateTime<Utc>>,
    /// User who requested the key, if any.
    pub created_by: Option<UserId>,
    /// SHA-256 hex fingerprint of the sealed material.
    pub fingerprint: String,
}

/// Manager owning the set of encryption keys.
pub struct EncryptionKeyManager {
    /// Master key sealing all managed key material.
    master_key: [u8; 32],
    /// All keys by id.
    keys: DashMap<KeyId, EncryptionKey>,
    /// Key ids by type.
    keys_by_type: DashMap<KeyType, Vec<KeyId>>,
    /// Per-type critical sections: generate/deactivate for the same type
    /// are serialized so rotation is atomic, and reads of the active key
    /// take the same lock so a mid-rotation state is never observable.
    type_locks: DashMap<KeyType, Arc<Mutex<()>>>,
    /// How long a generated key remains valid.
    validity: Duration,
}

impl EncryptionKeyManager {
    /// Create a new manager sealing material under the given master key.
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key,
            keys: DashMap::new(),
            keys_by_type: DashMap::new(),
            type_locks: DashMap::new(),
            validity: corebank_common::constants::key_validity_period(),
        }
    }

    /// Override the key validity period.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    fn type_lock(&self, key_type: KeyType) -> Arc<Mutex<()>> {
        self.type_locks
            .entry(key_type)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Generate a new active key of the given type.
    ///
    /// Deactivates every previously-active key of the same type within the
    /// same critical section, stamping their rotation timestamp.
    #[instrument(skip(self, created_by))]
    pub fn generate_key(
        &self,
        key_type: KeyType,
        algorithm: KeyAlgorithm,
        created_by: Option<UserId>,
    ) -> Result<EncryptionKey> {
        let lock = self.type_lock(key_type);
        let _guard = lock.lock();

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let material = encrypt(&self.master_key, &raw, Some(key_type.as_str().as_bytes()))?;

        let next_version = self
            .keys_by_type
            .get(&key_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.keys.get(id).map(|k| k.version))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
            + 1;

        let now = Utc::now();
        let key = EncryptionKey {
            id: KeyId::new(),
            fingerprint: sha256_hex(&material.ciphertext),
            material,
            algorithm,
            key_type,
            version: next_version,
            active: true,
            storage: KeyStorage::Database,
            created_at: now,
            rotated_at: None,
            expires_at: now + self.validity,
            last_used_at: None,
            created_by,
        };

        // Rotate out every other active key of this type.
        if let Some(ids) = self.keys_by_type.get(&key_type) {
            for id in ids.iter() {
                if let Some(mut sibling) = self.keys.get_mut(id) {
                    if sibling.active {
                        sibling.active = false;
                        sibling.rotated_at = Some(now);
                    }
                }
            }
        }

        self.keys.insert(key.id, key.clone());
        self.keys_by_type
            .entry(key_type)
            .or_default()
            .push(key.id);

        info!(
            key_id = %key.id,
            key_type = %key_type,
            version = key.version,
            "Encryption key generated"
        );

        Ok(key)
    }

    /// Deactivate a key.
    ///
    /// Fails if the key is the only active key of its type; a replacement
    /// must be generated first.
    #[instrument(skip(self))]
    pub fn deactivate(&self, key_id: KeyId) -> Result<()> {
        let key_type = self
            .keys
            .get(&key_id)
            .map(|k| k.key_type)
            .ok_or(LedgerError::KeyNotFound)?;

        let lock = self.type_lock(key_type);
        let _guard = lock.lock();

        let is_active = self
            .keys
            .get(&key_id)
            .map(|k| k.active)
            .ok_or(LedgerError::KeyNotFound)?;

        if is_active {
            let other_active = self
                .keys_by_type
                .get(&key_type)
                .map(|ids| {
                    ids.iter()
                        .filter(|id| **id != key_id)
                        .filter_map(|id| self.keys.get(id))
                        .any(|k| k.active)
                })
                .unwrap_or(false);

            if !other_active {
                return Err(LedgerError::LastActiveKey {
                    key_type: key_type.to_string(),
                });
            }
        }

        if let Some(mut key) = self.keys.get_mut(&key_id) {
            key.active = false;
            key.rotated_at = Some(Utc::now());
        }

        info!(key_id = %key_id, key_type = %key_type, "Encryption key deactivated");
        Ok(())
    }

    /// Get the active key for a type, touching its usage timestamp.
    ///
    /// Takes the type's critical section, so a concurrent rotation is seen
    /// either entirely or not at all.
    pub fn get_active_key(&self, key_type: KeyType) -> Result<EncryptionKey> {
        let lock = self.type_lock(key_type);
        let _guard = lock.lock();

        let active_id = self
            .keys_by_type
            .get(&key_type)
            .and_then(|ids| {
                ids.iter()
                    .filter_map(|id| self.keys.get(id))
                    .find(|k| k.active)
                    .map(|k| k.id)
            })
            .ok_or(LedgerError::NoActiveKey {
                key_type: key_type.to_string(),
            })?;

        let mut key = self
            .keys
            .get_mut(&active_id)
            .ok_or(LedgerError::KeyNotFound)?;
        key.last_used_at = Some(Utc::now());
        Ok(key.clone())
    }

    /// Get a key by id.
    pub fn get_key(&self, key_id: KeyId) -> Result<EncryptionKey> {
        self.keys
            .get(&key_id)
            .map(|k| k.clone())
            .ok_or(LedgerError::KeyNotFound)
    }

    /// Unseal a key's raw material for use by an encrypting component.
    pub fn unseal(&self, key: &EncryptionKey) -> Result<Vec<u8>> {
        decrypt(
            &self.master_key,
            &key.material,
            Some(key.key_type.as_str().as_bytes()),
        )
    }

    /// Count the active keys of a type. Always 0 or 1.
    pub fn active_key_count(&self, key_type: KeyType) -> usize {
        let lock = self.type_lock(key_type);
        let _guard = lock.lock();

        self.keys_by_type
            .get(&key_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.keys.get(id))
                    .filter(|k| k.active)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> EncryptionKeyManager {
        EncryptionKeyManager::new([7u8; 32])
    }

    #[test]
    fn test_generate_rotates_siblings() {
        let manager = test_manager();

        let k1 = manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();
        assert_eq!(k1.version, 1);
        assert!(k1.active);

        let k2 = manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();
        assert_eq!(k2.version, 2);

        let k1_after = manager.get_key(k1.id).unwrap();
        assert!(!k1_after.active);
        assert!(k1_after.rotated_at.is_some());

        let active = manager.get_active_key(KeyType::CardData).unwrap();
        assert_eq!(active.id, k2.id);
        assert_eq!(manager.active_key_count(KeyType::CardData), 1);
    }

    #[test]
    fn test_cannot_deactivate_last_active_key() {
        let manager = test_manager();
        let k1 = manager
            .generate_key(KeyType::Documents, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();

        let err = manager.deactivate(k1.id).unwrap_err();
        assert!(matches!(err, LedgerError::LastActiveKey { .. }));
        assert!(manager.get_key(k1.id).unwrap().active);
    }

    #[test]
    fn test_deactivate_inactive_sibling() {
        let manager = test_manager();
        let k1 = manager
            .generate_key(KeyType::PersonalData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();
        manager
            .generate_key(KeyType::PersonalData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();

        // k1 is already rotated out; deactivating it again is a no-op.
        assert!(manager.deactivate(k1.id).is_ok());
    }

    #[test]
    fn test_no_active_key() {
        let manager = test_manager();
        let err = manager.get_active_key(KeyType::TransactionDetails).unwrap_err();
        assert!(matches!(err, LedgerError::NoActiveKey { .. }));
    }

    #[test]
    fn test_types_rotate_independently() {
        let manager = test_manager();
        manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();
        manager
            .generate_key(KeyType::Documents, KeyAlgorithm::Chacha20Poly1305, None)
            .unwrap();
        manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();

        assert_eq!(manager.active_key_count(KeyType::CardData), 1);
        assert_eq!(manager.active_key_count(KeyType::Documents), 1);
        assert_eq!(
            manager.get_active_key(KeyType::CardData).unwrap().version,
            2
        );
        assert_eq!(
            manager.get_active_key(KeyType::Documents).unwrap().version,
            1
        );
    }

    #[test]
    fn test_rotation_never_hides_the_active_key() {
        let manager = Arc::new(test_manager());
        manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();

        let rotator = {
            let manager = manager.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    manager
                        .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
                        .unwrap();
                }
            })
        };

        // Readers racing the rotations must always see exactly one active
        // key of the type.
        while !rotator.is_finished() {
            let active = manager.get_active_key(KeyType::CardData).unwrap();
            assert!(active.active);
            assert_eq!(manager.active_key_count(KeyType::CardData), 1);
        }
        rotator.join().unwrap();

        assert_eq!(
            manager.get_active_key(KeyType::CardData).unwrap().version,
            201
        );
    }

    #[test]
    fn test_unseal_roundtrip() {
        let manager = test_manager();
        let key = manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();

        let raw = manager.unseal(&key).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn test_expiry_after_creation() {
        let manager = test_manager();
        let key = manager
            .generate_key(KeyType::CardData, KeyAlgorithm::Aes256Gcm, None)
            .unwrap();
        assert!(key.expires_at > key.created_at);
    }
}
