//! Permission codes granted to users.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tracing::{Instrument, info_span};

use super::{Error, PermissionStore, Result, with_deadline};

/// Set of permission codes held by one user. An empty set grants nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    #[must_use]
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Clone, Debug)]
pub struct PgPermissionStore {
    pool: PgPool,
}

impl PgPermissionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions> {
        let query = r"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        with_deadline(async {
            let rows = sqlx::query(query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;
            Ok(rows
                .iter()
                .map(|row| row.get::<String, _>("code"))
                .collect())
        })
        .await
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()> {
        // Unknown codes are ignored; already granted ones are kept once.
        let query = r"
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
            ON CONFLICT DO NOTHING
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();
        with_deadline(async {
            sqlx::query(query)
                .bind(user_id)
                .bind(&codes)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(Error::from_sqlx)?;
            Ok(())
        })
        .await
    }
}
