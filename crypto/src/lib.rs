//! CoreBank Cryptographic Primitives
//!
//! Provides at-rest encryption of key material, integrity hashing, and the
//! encryption key manager with its rotation invariants.

pub mod encryption;
pub mod hash;
pub mod keys;

pub use encryption::{decrypt, derive_key, encrypt, EncryptedPayload};
pub use hash::{sha256, sha256_hex};
pub use keys::{EncryptionKey, EncryptionKeyManager, KeyAlgorithm, KeyStorage, KeyType};
