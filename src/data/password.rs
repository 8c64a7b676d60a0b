//! Argon2id password hashing.
//!
//! Hashes are PHC strings, so the salt and cost parameters travel with the
//! hash. Verification compares in constant time inside `argon2`. A stored
//! hash that does not parse is an error, not a mismatch.

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString},
};
use rand::rngs::OsRng;

use super::{Error, Result};

/// Hash a plaintext password with a fresh random salt.
///
/// # Errors
/// Returns an internal error if hashing fails.
pub fn hash(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| Error::Internal(anyhow!("password hashing failed: {err}")))
}

/// Check a plaintext password against a stored PHC hash.
///
/// # Errors
/// Returns an internal error when `stored` is not a valid PHC string.
pub fn verify(plaintext: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|err| Error::Internal(anyhow!("malformed password hash: {err}")))?;
    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(err) => Err(Error::Internal(anyhow!(
            "password verification failed: {err}"
        ))),
    }
}
