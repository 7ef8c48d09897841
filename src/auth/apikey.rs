//! API key generation and hashing
//!
//! Keys have the literal prefix `mcpgw_` followed by 64 lowercase hex
//! characters (32 random bytes). Only the SHA-256 hash of the full plain
//! key is ever stored; the plain key is shown once at creation time.

use crate::constants::{API_KEY_PREFIX, API_KEY_RANDOM_BYTES};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate a fresh API key
///
/// Returns `(plain, hash)` where `hash = sha256_hex(plain)`.
pub fn generate() -> (String, String) {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..API_KEY_RANDOM_BYTES).map(|_| rng.random()).collect();
    let plain = format!("{}{}", API_KEY_PREFIX, hex::encode(bytes));
    let digest = hash(&plain);
    (plain, digest)
}

/// SHA-256 over the full plain key, hex-encoded
pub fn hash(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether a presented token looks like a gateway API key
pub fn is_api_key(token: &str) -> bool {
    token.starts_with(API_KEY_PREFIX)
}

/// Constant-time comparison of a plain key against a stored hash
pub fn verify(plain: &str, stored_hash: &str) -> bool {
    let computed = hash(plain);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
