//! Password hashes, token digests and random identifiers

use super::CryptoError;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hash a user or master password with bcrypt
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| CryptoError::Hash(e.to_string()))
}

/// Verify a password against a bcrypt hash. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// SHA-256 of an API token, hex encoded
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// `bytes` random bytes, hex encoded
pub fn random_hash(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Normalised digest of an item name, used to reject near-duplicates
/// such as "ACME Corp." and "acme corp"
pub fn item_hash(name: &str) -> String {
    let normalised: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    hex::encode(Sha256::digest(normalised.as_bytes()))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_token_hash_is_stable_hex() {
        let a = hash_token("sp_abc");
        assert_eq!(a, hash_token("sp_abc"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("sp_abd"));
    }

    #[test]
    fn test_random_hash_length() {
        assert_eq!(random_hash(16).len(), 32);
        assert_ne!(random_hash(16), random_hash(16));
    }

    #[test]
    fn test_item_hash_ignores_case_and_punctuation() {
        assert_eq!(item_hash("ACME Corp."), item_hash("acme corp"));
        assert_eq!(item_hash("web-servers"), item_hash("Web Servers"));
        assert_ne!(item_hash("acme"), item_hash("acne"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("token", "token"));
        assert!(!constant_time_eq("token", "tokem"));
        assert!(!constant_time_eq("token", "token2"));
    }
}
