//! AES-GCM encryption of key material at rest.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use corebank_common::{LedgerError, Result};

/// Encrypted payload with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Algorithm identifier.
    pub algorithm: String,
    /// Nonce (12 bytes for AES-GCM).
    pub nonce: Vec<u8>,
    /// Ciphertext.
    pub ciphertext: Vec<u8>,
}

/// Encrypt plaintext using AES-256-GCM.
///
/// # Arguments
/// * `key` - 32-byte encryption key
/// * `plaintext` - Data to encrypt
/// * `aad` - Additional authenticated data (not encrypted, but authenticated)
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: Option<&[u8]>) -> Result<EncryptedPayload> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| LedgerError::Crypto(e.to_string()))?;

    // Generate random nonce
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|e| LedgerError::Crypto(e.to_string()))?;

    Ok(EncryptedPayload {
        algorithm: "AES-256-GCM".to_string(),
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt ciphertext using AES-256-GCM.
///
/// # Arguments
/// * `key` - 32-byte encryption key
/// * `payload` - Encrypted payload to decrypt
/// * `aad` - Additional authenticated data (must match what was used during encryption)
pub fn decrypt(key: &[u8; 32], payload: &EncryptedPayload, aad: Option<&[u8]>) -> Result<Vec<u8>> {
    if payload.algorithm != "AES-256-GCM" {
        return Err(LedgerError::Crypto(format!(
            "Unsupported algorithm: {}",
            payload.algorithm
        )));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| LedgerError::Crypto(e.to_string()))?;

    let nonce_bytes: [u8; 12] = payload
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| LedgerError::Crypto("Invalid nonce length".to_string()))?;

    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: payload.ciphertext.as_slice(),
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|_| LedgerError::Crypto("Decryption failed".to_string()))
}

/// Derive an encryption key using HKDF-SHA256.
pub fn derive_key(master_secret: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let hk = Hkdf::<Sha256>::new(Some(salt), master_secret);
    let mut key = [0u8; 32];
    hk.expand(info, &mut key)
        .map_err(|e| LedgerError::Crypto(e.to_string()))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [0u8; 32]; // Zero key for testing only
        let plaintext = b"wallet key material";

        let encrypted = encrypt(&key, plaintext, None).unwrap();
        let decrypted = decrypt(&key, &encrypted, None).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_nonces() {
        let key = [0u8; 32];
        let plaintext = b"same material";

        let enc1 = encrypt(&key, plaintext, None).unwrap();
        let enc2 = encrypt(&key, plaintext, None).unwrap();

        assert_ne!(enc1.nonce, enc2.nonce);
        assert_ne!(enc1.ciphertext, enc2.ciphertext);
    }

    #[test]
    fn test_aad_mismatch() {
        let key = [0u8; 32];
        let encrypted = encrypt(&key, b"secret", Some(b"card_data")).unwrap();

        assert!(decrypt(&key, &encrypted, Some(b"documents")).is_err());
        assert!(decrypt(&key, &encrypted, Some(b"card_data")).is_ok());
    }

    #[test]
    fn test_wrong_key() {
        let key1 = [0u8; 32];
        let key2 = [1u8; 32];

        let encrypted = encrypt(&key1, b"secret", None).unwrap();
        assert!(decrypt(&key2, &encrypted, None).is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key(b"master", b"salt", b"card_data").unwrap();
        let b = derive_key(b"master", b"salt", b"card_data").unwrap();
        let c = derive_key(b"master", b"salt", b"documents").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
