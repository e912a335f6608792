//! AES-256-GCM sealing with Argon2 key derivation
//!
//! The same primitives protect two layers: the vault file itself and the
//! account passwords stored inside it (the "data key").

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cryptographic errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Password hashing failed: {0}")]
    Hash(String),
}

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 16;

/// A 256-bit symmetric key derived from a password
pub struct VaultKey {
    key: SecretBox<[u8; KEY_SIZE]>,
}

impl VaultKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self {
            key: SecretBox::new(Box::new(key)),
        })
    }

    fn as_bytes(&self) -> &[u8] {
        self.key.expose_secret().as_slice()
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(***)")
    }
}

/// Sealed bytes: base64 nonce and ciphertext
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: String,
    pub ciphertext: String,
}

impl EncryptedData {
    /// Compact `nonce:ciphertext` form, used by export files
    pub fn encode(&self) -> String {
        format!("{}:{}", self.nonce, self.ciphertext)
    }

    pub fn decode(s: &str) -> Result<Self, CryptoError> {
        match s.split_once(':') {
            Some((nonce, ciphertext)) if !nonce.is_empty() && !ciphertext.is_empty() => Ok(Self {
                nonce: nonce.to_string(),
                ciphertext: ciphertext.to_string(),
            }),
            _ => Err(CryptoError::InvalidFormat(
                "expected nonce:ciphertext".to_string(),
            )),
        }
    }
}

/// Derive a key from a password and salt using Argon2id defaults
pub fn derive_key(password: &SecretString, salt: &[u8]) -> Result<VaultKey, CryptoError> {
    let salt_string = SaltString::encode_b64(salt)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let hash = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt_string)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let output = hash
        .hash
        .ok_or_else(|| CryptoError::KeyDerivationFailed("no hash output".to_string()))?;

    VaultKey::from_bytes(&output.as_bytes()[..KEY_SIZE])
}

pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn encrypt(plaintext: &[u8], key: &VaultKey) -> Result<EncryptedData, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: STANDARD.encode(nonce_bytes),
        ciphertext: STANDARD.encode(ciphertext),
    })
}

pub fn decrypt(sealed: &EncryptedData, key: &VaultKey) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = STANDARD
        .decode(&sealed.nonce)
        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "invalid nonce length: {}",
            nonce_bytes.len()
        )));
    }

    let ciphertext = STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid ciphertext: {}", e)))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed("wrong key or corrupted data".to_string()))
}

pub fn encrypt_string(plaintext: &str, key: &VaultKey) -> Result<EncryptedData, CryptoError> {
    encrypt(plaintext.as_bytes(), key)
}

pub fn decrypt_string(sealed: &EncryptedData, key: &VaultKey) -> Result<String, CryptoError> {
    let bytes = decrypt(sealed, key)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
}
