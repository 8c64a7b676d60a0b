//! Token issuance, verification, and redemption.
//!
//! Flow Overview: a token is 32 bytes from the OS RNG, encoded base64url
//! without padding. The caller receives the plaintext exactly once; the store
//! only ever sees its SHA-256. Lookups filter on hash, scope, and expiry, so
//! an unknown, expired, or wrong-scope token all come back as `NotFound`.

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::data::{self, Error, Scope, TokenRecord, TokenStore, User, retry_read};

const TOKEN_BYTES: usize = 32;

/// Encoded length of a plaintext token.
pub const TOKEN_LENGTH: usize = 43;

/// A freshly issued token. This is the only place the plaintext exists.
#[derive(Clone, Serialize, ToSchema)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(skip)]
    pub scope: Scope,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("plaintext", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .field("user_id", &self.user_id)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Generate a new plaintext token.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a plaintext token for storage and lookup.
#[must_use]
pub fn hash(plaintext: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.finalize().to_vec()
}

/// Shape check done before touching the store.
#[must_use]
pub fn is_well_formed(plaintext: &str) -> bool {
    plaintext.len() == TOKEN_LENGTH
        && plaintext
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Issue a token for `user_id` valid for `ttl`.
    ///
    /// For activation and password-reset scopes the store replaces any
    /// existing token of the same user and scope, so only the newest one can
    /// be redeemed.
    ///
    /// # Errors
    /// Returns an error if randomness or the store fails.
    #[instrument(skip(self))]
    pub async fn issue(&self, user_id: i64, ttl: Duration, scope: Scope) -> data::Result<Token> {
        let plaintext = generate()?;
        let ttl = chrono::Duration::from_std(ttl).context("token ttl out of range")?;
        let expiry = Utc::now()
            .checked_add_signed(ttl)
            .context("token expiry out of range")?;

        let record = TokenRecord {
            hash: hash(&plaintext),
            user_id,
            expiry,
            scope,
        };
        self.store.insert(&record).await?;
        debug!(user_id, %scope, %expiry, "token issued");

        Ok(Token {
            plaintext,
            expiry,
            user_id,
            scope,
        })
    }

    /// Resolve a live token to its owner without consuming it.
    ///
    /// # Errors
    /// Returns `NotFound` for malformed, unknown, expired, or wrong-scope
    /// tokens, and `StoreUnavailable` after bounded retries.
    #[instrument(skip_all, fields(%scope))]
    pub async fn verify(&self, plaintext: &str, scope: Scope) -> data::Result<User> {
        if !is_well_formed(plaintext) {
            return Err(Error::NotFound);
        }
        let token_hash = hash(plaintext);
        retry_read(|| self.store.get_user(&token_hash, scope, Utc::now())).await
    }

    /// Resolve and delete a live token in one step.
    ///
    /// Not retried: a retry after an ambiguous failure could observe the
    /// token already consumed by the first attempt.
    ///
    /// # Errors
    /// Same outcomes as [`TokenManager::verify`], without retries.
    #[instrument(skip_all, fields(%scope))]
    pub async fn redeem(&self, plaintext: &str, scope: Scope) -> data::Result<User> {
        if !is_well_formed(plaintext) {
            return Err(Error::NotFound);
        }
        self.store.take(&hash(plaintext), scope, Utc::now()).await
    }

    /// Delete every token `user_id` holds in `scope`.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    #[instrument(skip(self))]
    pub async fn delete_all_for_user(&self, user_id: i64, scope: Scope) -> data::Result<()> {
        self.store.delete_all_for_user(user_id, scope).await
    }
}
