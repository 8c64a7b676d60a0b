//! User records and their `PostgreSQL` store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use utoipa::ToSchema;

use super::{Error, Result, UserStore, is_unique_violation, with_deadline};

pub(crate) const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub activated: bool,
    #[serde(skip)]
    pub version: i32,
}

/// Fields supplied on registration; the store assigns the rest.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
}

impl User {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            created_at: row.get("created_at"),
            name: row.get("name"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            activated: row.get("activated"),
            version: row.get("version"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser) -> Result<User> {
        let query = r"
            INSERT INTO users (name, email, password_hash, activated)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, version
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(user.activated)
                .fetch_one(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| {
                    if is_unique_violation(&err, EMAIL_CONSTRAINT) {
                        Error::DuplicateEmail
                    } else {
                        Error::from_sqlx(err)
                    }
                })?;

            Ok(User {
                id: row.get("id"),
                created_at: row.get("created_at"),
                version: row.get("version"),
                name: user.name,
                email: user.email,
                password_hash: user.password_hash,
                activated: user.activated,
            })
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        let query = r"
            SELECT id, created_at, name, email, password_hash, activated, version
            FROM users
            WHERE email = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;

            row.as_ref().map(User::from_row).ok_or(Error::NotFound)
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<User> {
        // The version predicate and the increment are one statement, so two
        // writers holding the same version cannot both succeed.
        let query = r"
            UPDATE users
            SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING version
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(user.activated)
                .bind(user.id)
                .bind(user.version)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| {
                    if is_unique_violation(&err, EMAIL_CONSTRAINT) {
                        Error::DuplicateEmail
                    } else {
                        Error::from_sqlx(err)
                    }
                })?;

            let row = row.ok_or(Error::EditConflict)?;
            let mut updated = user.clone();
            updated.version = row.get("version");
            Ok(updated)
        })
        .await
    }
}
