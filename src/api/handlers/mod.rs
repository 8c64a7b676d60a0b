//! Route handlers and the helpers they share.

pub mod health;
pub mod movies;
pub mod tokens;
pub mod users;

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::error;
use ulid::Ulid;

use super::error::ApiError;
use crate::background::BackgroundTasks;
use crate::data::password;
use crate::mailer::{Mailer, Message};

/// Argon2 is CPU bound; keep it off the async workers.
pub(crate) async fn hash_password(plaintext: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || password::hash(&plaintext))
        .await
        .map_err(|err| {
            error!("password hashing task failed: {err}");
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}

pub(crate) async fn verify_password(plaintext: String, stored: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || password::verify(&plaintext, &stored))
        .await
        .map_err(|err| {
            error!("password verification task failed: {err}");
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}

static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

/// Spend the same Argon2 work as a real check when no user matched.
pub(crate) async fn verify_dummy_password(plaintext: String) -> Result<(), ApiError> {
    let stored = DUMMY_HASH
        .get_or_try_init(|| hash_password(Ulid::new().to_string()))
        .await?
        .clone();
    verify_password(plaintext, stored).await.map(|_| ())
}

/// Send `message` without holding up the response.
pub(crate) fn send_email(
    background: &BackgroundTasks,
    mailer: Arc<dyn Mailer>,
    recipient: String,
    message: Message,
) {
    background.run_in_background("email", async move {
        if let Err(err) = mailer.send(&recipient, &message).await {
            error!(template = message.template(), "failed to send email: {err:#}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn password_helpers_round_trip_off_thread() -> Result<(), ApiError> {
        let stored = hash_password("pa55word".to_string()).await?;
        assert!(verify_password("pa55word".to_string(), stored.clone()).await?);
        assert!(!verify_password("pa55wor".to_string(), stored).await?);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_internal() {
        let result = verify_password("pa55word".to_string(), "garbage".to_string()).await;
        assert!(matches!(result, Err(ApiError::Internal)));
    }

    #[tokio::test]
    async fn dummy_verification_runs_argon2_once_initialized() -> Result<(), ApiError> {
        verify_dummy_password("pa55word".to_string()).await?;
        let first = DUMMY_HASH.get().cloned();
        assert!(first.as_deref().is_some_and(|hash| hash.starts_with("$argon2")));

        verify_dummy_password("another".to_string()).await?;
        assert_eq!(DUMMY_HASH.get().cloned(), first);
        Ok(())
    }
}
