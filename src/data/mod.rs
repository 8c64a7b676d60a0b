//! Persistence boundary for users, tokens, and permissions.
//!
//! The auth core only talks to the traits in this module. `PostgreSQL`
//! implementations live next to each record type; [`memory::MemoryStore`]
//! implements the same contracts in-process for tests and local runs.
//!
//! Every store call runs under [`QUERY_TIMEOUT`]; an elapsed deadline is
//! reported as [`Error::StoreUnavailable`]. Constraint violations are
//! translated here so raw database text never reaches API callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::warn;

pub mod memory;
pub mod password;
pub mod permissions;
pub mod tokens;
pub mod users;

pub use permissions::{Permissions, PgPermissionStore};
pub use tokens::{PgTokenStore, Scope, TokenRecord};
pub use users::{NewUser, PgUserStore, User};

/// Deadline applied to every store call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Attempts made by [`retry_read`] before giving up.
const READ_ATTEMPTS: u32 = 3;

const READ_BACKOFF_BASE: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Record absent. Unknown and expired tokens both map here.
    #[error("record not found")]
    NotFound,
    #[error("duplicate email")]
    DuplicateEmail,
    /// Optimistic version check failed on update.
    #[error("edit conflict")]
    EditConflict,
    #[error("store unavailable")]
    StoreUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Map a driver error that has no domain meaning at the call site.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::StoreUnavailable,
            other => Self::Internal(anyhow::Error::new(other).context("database query failed")),
        }
    }
}

/// Unique-constraint violation (`SQLSTATE 23505`) on the named constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().is_some_and(|code| code.as_ref() == "23505")
                && db_err.constraint().is_none_or(|name| name == constraint)
        }
        _ => false,
    }
}

/// Run a store future under [`QUERY_TIMEOUT`].
pub(crate) async fn with_deadline<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(QUERY_TIMEOUT, future)
        .await
        .unwrap_or(Err(Error::StoreUnavailable))
}

/// Retry an idempotent read while the store reports itself unavailable.
///
/// Only for reads: redeeming a single-use token must never go through here.
pub async fn retry_read<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(Error::StoreUnavailable) if attempt < READ_ATTEMPTS => {
                let backoff = READ_BACKOFF_BASE * 2u32.pow(attempt - 1);
                warn!(attempt, ?backoff, "store unavailable, retrying read");
                sleep(backoff).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user and return it with its generated id and version.
    async fn insert(&self, user: NewUser) -> Result<User>;

    async fn get_by_email(&self, email: &str) -> Result<User>;

    /// Persist `user` if its `version` still matches the stored one.
    ///
    /// Returns the user with the bumped version, or [`Error::EditConflict`].
    async fn update(&self, user: &User) -> Result<User>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store a token. Single-use scopes replace any token the user already
    /// holds in that scope within the same statement.
    async fn insert(&self, token: &TokenRecord) -> Result<()>;

    /// Owner of a live token matching `hash` and `scope`.
    async fn get_user(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Result<User>;

    /// Delete a live token and return its owner in one step.
    async fn take(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Result<User>;

    async fn delete_all_for_user(&self, user_id: i64, scope: Scope) -> Result<()>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions>;

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()>;
}

/// Store handles shared by the API layer.
#[derive(Clone)]
pub struct Models {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl Models {
    /// Build the `PostgreSQL` stores around a single shared pool.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            tokens: Arc::new(PgTokenStore::new(pool.clone())),
            permissions: Arc::new(PgPermissionStore::new(pool)),
        }
    }
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Models").finish_non_exhaustive()
    }
}
