//! Cryptographic primitives for the vault
//!
//! - AES-256-GCM sealing with Argon2-derived keys (`encrypt`)
//! - bcrypt password hashes, token digests and random hashes (`hash`)

mod encrypt;
mod hash;

pub use encrypt::{
    decrypt, decrypt_string, derive_key, encrypt, encrypt_string, generate_salt, CryptoError,
    EncryptedData, VaultKey,
};
pub use hash::{
    constant_time_eq, hash_password, hash_token, item_hash, random_hash, verify_password,
};
