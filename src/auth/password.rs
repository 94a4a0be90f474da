//! Credential hashing, verification and opaque token helpers.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Prefix every stored Argon2 PHC string starts with
pub const HASHED_CREDENTIAL_TAG: &str = "$argon2";

/// Number of random bytes in session and reset tokens (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Salt length recommended for Argon2 PHC strings
const SALT_BYTES: usize = 16;

lazy_static! {
    /// Verified against when the email is unknown so both failure paths cost the same
    static ref DUMMY_CREDENTIAL: String = hash_password("optohub-timing-equalizer")
        .unwrap_or_else(|_| String::from("$argon2id$v=19$m=19456,t=2,p=1$invalid$invalid"));
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt_bytes: [u8; SALT_BYTES] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash.
///
/// Parameters are read from the PHC string, so hashes produced with older cost
/// settings keep verifying. A malformed credential is simply a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Validate password strength
/// Returns None if valid, or Some(error_message) if invalid
pub fn validate_password_strength(password: &str) -> Option<String> {
    if password.trim().is_empty() {
        return Some("Password is required".to_string());
    }
    if password.chars().count() < 8 {
        return Some("Password must be at least 8 characters".to_string());
    }
    if password.len() > 128 {
        return Some("Password is too long (max 128 characters)".to_string());
    }
    None
}

/// Whether a stored credential is a hash rather than legacy plaintext
pub fn is_hashed(credential: &str) -> bool {
    credential.starts_with(HASHED_CREDENTIAL_TAG)
}

/// Compare an attempt against a legacy plaintext credential in constant time
pub fn legacy_matches(attempt: &str, stored: &str) -> bool {
    let attempt = attempt.as_bytes();
    let stored = stored.as_bytes();
    attempt.len() == stored.len() && bool::from(attempt.ct_eq(stored))
}

/// Verify against either credential format
pub fn credential_matches(attempt: &str, stored: &str) -> bool {
    if is_hashed(stored) {
        verify_password(attempt, stored)
    } else {
        legacy_matches(attempt, stored)
    }
}

/// Burn the same work as a real verification
pub fn verify_dummy(attempt: &str) {
    let _ = verify_password(attempt, &DUMMY_CREDENTIAL);
}

/// Generate a random token
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; TOKEN_BYTES] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
