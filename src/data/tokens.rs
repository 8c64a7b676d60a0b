//! Token records and their `PostgreSQL` store.
//!
//! Only the SHA-256 of a token is stored. Activation and password-reset
//! tokens are single-use and exclusive per user: a partial unique index on
//! `(user_id, scope)` backs an upsert, so issuing a new one replaces the old
//! one atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use tracing::{Instrument, info_span};

use super::{Error, Result, TokenStore, User, with_deadline};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Activation,
    Authentication,
    PasswordReset,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Authentication => "authentication",
            Self::PasswordReset => "password-reset",
        }
    }

    /// Scopes for which a user holds at most one live token.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        !matches!(self, Self::Authentication)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of a token. Never carries the plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: Vec<u8>,
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: Scope,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("hash", &"[HASH]")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &TokenRecord) -> Result<()> {
        let query = if token.scope.is_exclusive() {
            r"
            INSERT INTO tokens (hash, user_id, expiry, scope)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, scope) WHERE scope <> 'authentication'
            DO UPDATE SET hash = EXCLUDED.hash, expiry = EXCLUDED.expiry
            "
        } else {
            r"
            INSERT INTO tokens (hash, user_id, expiry, scope)
            VALUES ($1, $2, $3, $4)
            "
        };
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        with_deadline(async {
            sqlx::query(query)
                .bind(&token.hash)
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Result<User> {
        let query = r"
            SELECT users.id, users.created_at, users.name, users.email,
                   users.password_hash, users.activated, users.version
            FROM users
            INNER JOIN tokens ON users.id = tokens.user_id
            WHERE tokens.hash = $1
              AND tokens.scope = $2
              AND tokens.expiry > $3
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;
            row.as_ref().map(User::from_row).ok_or(Error::NotFound)
        })
        .await
    }

    async fn take(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Result<User> {
        // DELETE ... RETURNING makes the lookup and the consumption one step:
        // of two concurrent redemptions only one sees the row.
        let query = r"
            WITH redeemed AS (
                DELETE FROM tokens
                WHERE hash = $1 AND scope = $2 AND expiry > $3
                RETURNING user_id
            )
            SELECT users.id, users.created_at, users.name, users.email,
                   users.password_hash, users.activated, users.version
            FROM users
            INNER JOIN redeemed ON users.id = redeemed.user_id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;
            row.as_ref().map(User::from_row).ok_or(Error::NotFound)
        })
        .await
    }

    async fn delete_all_for_user(&self, user_id: i64, scope: Scope) -> Result<()> {
        let query = "DELETE FROM tokens WHERE user_id = $1 AND scope = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        with_deadline(async {
            let result = sqlx::query(query)
                .bind(user_id)
                .bind(scope.as_str())
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;
            tracing::debug!(user_id, %scope, deleted = result.rows_affected(), "tokens deleted");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_wire_names() {
        assert_eq!(Scope::PasswordReset.as_str(), "password-reset");
        assert_eq!(
            serde_json::to_string(&Scope::PasswordReset).ok().as_deref(),
            Some("\"password-reset\"")
        );
        assert_eq!(Scope::Authentication.to_string(), "authentication");
    }

    #[test]
    fn only_authentication_allows_many() {
        assert!(Scope::Activation.is_exclusive());
        assert!(Scope::PasswordReset.is_exclusive());
        assert!(!Scope::Authentication.is_exclusive());
    }

    #[test]
    fn record_debug_hides_hash() {
        let record = TokenRecord {
            hash: vec![0xde, 0xad],
            user_id: 1,
            expiry: Utc::now(),
            scope: Scope::Activation,
        };
        let debug = format!("{record:?}");
        assert!(debug.contains("[HASH]"));
        assert!(!debug.contains("222"));
    }
}
