//! Authentication, authorization, and request admission.
//!
//! Flow Overview:
//! 1) `middleware::rate_limit` admits or rejects by client address.
//! 2) `middleware::authenticate` resolves the bearer token to an [`Identity`].
//! 3) `middleware::require_permission` gates handlers on a permission code.

pub mod identity;
pub mod middleware;
pub mod permissions;
pub mod rate_limit;
pub mod tokens;

pub use identity::Identity;
pub use rate_limit::{Admission, RateLimitConfig, RateLimiter};
pub use tokens::{Token, TokenManager};

use std::{sync::Arc, time::Duration};

use crate::data::{Models, Scope};

const DEFAULT_ACTIVATION_TTL_SECONDS: u64 = 3 * 24 * 60 * 60;
const DEFAULT_AUTHENTICATION_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECONDS: u64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    activation_ttl_seconds: u64,
    authentication_ttl_seconds: u64,
    password_reset_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            activation_ttl_seconds: DEFAULT_ACTIVATION_TTL_SECONDS,
            authentication_ttl_seconds: DEFAULT_AUTHENTICATION_TTL_SECONDS,
            password_reset_ttl_seconds: DEFAULT_PASSWORD_RESET_TTL_SECONDS,
        }
    }

    #[must_use]
    pub const fn with_activation_ttl_seconds(mut self, seconds: u64) -> Self {
        self.activation_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_authentication_ttl_seconds(mut self, seconds: u64) -> Self {
        self.authentication_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_password_reset_ttl_seconds(mut self, seconds: u64) -> Self {
        self.password_reset_ttl_seconds = seconds;
        self
    }

    /// Lifetime of a freshly issued token of `scope`.
    #[must_use]
    pub const fn ttl(&self, scope: Scope) -> Duration {
        let seconds = match scope {
            Scope::Activation => self.activation_ttl_seconds,
            Scope::Authentication => self.authentication_ttl_seconds,
            Scope::PasswordReset => self.password_reset_ttl_seconds,
        };
        Duration::from_secs(seconds)
    }
}

/// Shared state for the auth chain and the handlers behind it.
#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    models: Models,
    tokens: TokenManager,
    limiter: Arc<RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, models: Models, limiter: Arc<RateLimiter>) -> Self {
        let tokens = TokenManager::new(models.tokens.clone());
        Self {
            config,
            models,
            tokens,
            limiter,
        }
    }

    #[must_use]
    pub const fn models(&self) -> &Models {
        &self.models
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Issue a token of `scope` with the configured lifetime.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn issue(&self, user_id: i64, scope: Scope) -> crate::data::Result<Token> {
        self.tokens
            .issue(user_id, self.config.ttl(scope), scope)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls_per_scope() {
        let config = AuthConfig::new();
        assert_eq!(
            config.ttl(Scope::Activation),
            Duration::from_secs(3 * 24 * 3600)
        );
        assert_eq!(
            config.ttl(Scope::Authentication),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(config.ttl(Scope::PasswordReset), Duration::from_secs(900));
    }

    #[test]
    fn ttls_are_overridable() {
        let config = AuthConfig::new()
            .with_activation_ttl_seconds(60)
            .with_authentication_ttl_seconds(120)
            .with_password_reset_ttl_seconds(30);
        assert_eq!(config.ttl(Scope::Activation), Duration::from_secs(60));
        assert_eq!(config.ttl(Scope::Authentication), Duration::from_secs(120));
        assert_eq!(config.ttl(Scope::PasswordReset), Duration::from_secs(30));
    }
}
