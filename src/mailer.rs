//! Outbound notification emails.
//!
//! Delivery is pluggable; the bundled [`LogMailer`] only logs the recipient
//! and template. Token plaintext travels inside [`Message`] to the transport
//! and is never logged.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tracing::info;

/// Email content, by template.
#[derive(Clone)]
pub enum Message {
    Welcome {
        user_id: i64,
        activation_token: String,
    },
    Activation {
        activation_token: String,
    },
    PasswordReset {
        reset_token: String,
    },
}

impl Message {
    #[must_use]
    pub const fn template(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "user_welcome",
            Self::Activation { .. } => "token_activation",
            Self::PasswordReset { .. } => "token_password_reset",
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("template", &self.template())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver `message` to `recipient`.
    async fn send(&self, recipient: &str, message: &Message) -> Result<()>;
}

/// Local dev mailer that logs instead of sending.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, message: &Message) -> Result<()> {
        info!(
            to_email = %recipient,
            template = message.template(),
            "email send stub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_token() {
        let message = Message::PasswordReset {
            reset_token: "plaintext-token-value".to_string(),
        };
        let debug = format!("{message:?}");
        assert!(!debug.contains("plaintext-token-value"));
        assert!(debug.contains("token_password_reset"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_messages() {
        let message = Message::Welcome {
            user_id: 1,
            activation_token: "t".repeat(43),
        };
        assert_eq!(message.template(), "user_welcome");
        assert!(LogMailer.send("alice@example.com", &message).await.is_ok());
    }
}
