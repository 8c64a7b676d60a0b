//! In-process store implementing the same contracts as the `PostgreSQL` one.
//!
//! Each trait method takes the state lock once, so a conditional write is
//! as atomic here as its single-statement SQL counterpart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Error, Models, NewUser, PermissionStore, Permissions, Result, Scope, TokenRecord, TokenStore,
    User, UserStore,
};

/// Codes known to the store, mirroring the seeded `permissions` table.
pub const KNOWN_PERMISSIONS: [&str; 2] = ["movies:read", "movies:write"];

#[derive(Debug, Default)]
struct State {
    next_user_id: i64,
    users: HashMap<i64, User>,
    tokens: HashMap<Vec<u8>, TokenRecord>,
    permissions: HashMap<i64, BTreeSet<String>>,
}

impl State {
    fn live_token(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Option<&TokenRecord> {
        self.tokens
            .get(hash)
            .filter(|token| token.scope == scope && token.expiry > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored tokens a user holds in `scope`, live or not.
    #[must_use]
    pub fn token_count(&self, user_id: i64, scope: Scope) -> usize {
        self.state()
            .tokens
            .values()
            .filter(|token| token.user_id == user_id && token.scope == scope)
            .count()
    }
}

impl From<Arc<MemoryStore>> for Models {
    fn from(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            tokens: store.clone(),
            permissions: store,
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: NewUser) -> Result<User> {
        let mut state = self.state();
        if state.users.values().any(|existing| existing.email == user.email) {
            return Err(Error::DuplicateEmail);
        }
        state.next_user_id += 1;
        let stored = User {
            id: state.next_user_id,
            created_at: Utc::now(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            activated: user.activated,
            version: 1,
        };
        state.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        self.state()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn update(&self, user: &User) -> Result<User> {
        let mut state = self.state();
        if state
            .users
            .values()
            .any(|other| other.id != user.id && other.email == user.email)
        {
            return Err(Error::DuplicateEmail);
        }
        let stored = state.users.get_mut(&user.id).ok_or(Error::EditConflict)?;
        if stored.version != user.version {
            return Err(Error::EditConflict);
        }
        let mut updated = user.clone();
        updated.version = stored.version + 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(&self, token: &TokenRecord) -> Result<()> {
        let mut state = self.state();
        if token.scope.is_exclusive() {
            state.tokens.retain(|_, existing| {
                existing.user_id != token.user_id || existing.scope != token.scope
            });
        }
        state.tokens.insert(token.hash.clone(), token.clone());
        Ok(())
    }

    async fn get_user(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Result<User> {
        let state = self.state();
        let token = state.live_token(hash, scope, now).ok_or(Error::NotFound)?;
        state
            .users
            .get(&token.user_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn take(&self, hash: &[u8], scope: Scope, now: DateTime<Utc>) -> Result<User> {
        let mut state = self.state();
        let user_id = state
            .live_token(hash, scope, now)
            .map(|token| token.user_id)
            .ok_or(Error::NotFound)?;
        state.tokens.remove(hash);
        state.users.get(&user_id).cloned().ok_or(Error::NotFound)
    }

    async fn delete_all_for_user(&self, user_id: i64, scope: Scope) -> Result<()> {
        self.state()
            .tokens
            .retain(|_, token| token.user_id != user_id || token.scope != scope);
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions> {
        Ok(self
            .state()
            .permissions
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<()> {
        let mut state = self.state();
        let granted = state.permissions.entry(user_id).or_default();
        for code in codes {
            if KNOWN_PERMISSIONS.contains(code) {
                granted.insert((*code).to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Alice".to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            activated: false,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::default();
        assert!(UserStore::insert(&store, new_user("alice@example.com")).await.is_ok());
        assert!(matches!(
            UserStore::insert(&store, new_user("alice@example.com")).await,
            Err(Error::DuplicateEmail)
        ));
    }

    #[tokio::test]
    async fn stale_version_is_an_edit_conflict() -> anyhow::Result<()> {
        let store = MemoryStore::default();
        let user = UserStore::insert(&store, new_user("alice@example.com")).await?;

        let mut first = user.clone();
        first.name = "Alice A.".to_string();
        let updated = store.update(&first).await?;
        assert_eq!(updated.version, user.version + 1);

        let mut second = user;
        second.name = "Alice B.".to_string();
        assert!(matches!(
            store.update(&second).await,
            Err(Error::EditConflict)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_are_not_found() -> anyhow::Result<()> {
        let store = MemoryStore::default();
        let user = UserStore::insert(&store, new_user("alice@example.com")).await?;
        let now = Utc::now();
        TokenStore::insert(
            &store,
            &TokenRecord {
                hash: vec![1; 32],
                user_id: user.id,
                expiry: now - Duration::seconds(1),
                scope: Scope::Authentication,
            },
        )
        .await?;
        assert!(matches!(
            store.get_user(&[1; 32], Scope::Authentication, now).await,
            Err(Error::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_permission_codes_are_ignored() -> anyhow::Result<()> {
        let store = MemoryStore::default();
        store
            .add_for_user(1, &["movies:read", "movies:delete"])
            .await?;
        let permissions = store.get_all_for_user(1).await?;
        assert!(permissions.includes("movies:read"));
        assert!(!permissions.includes("movies:delete"));
        Ok(())
    }
}
