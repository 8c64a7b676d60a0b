use clap::{Arg, ArgMatches, Command};

use crate::auth::AuthConfig;

pub const ARG_ACTIVATION_TTL: &str = "activation-token-ttl-seconds";
pub const ARG_AUTHENTICATION_TTL: &str = "authentication-token-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL: &str = "password-reset-token-ttl-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub activation_ttl_seconds: u64,
    pub authentication_ttl_seconds: u64,
    pub password_reset_ttl_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let seconds = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);
        Self {
            activation_ttl_seconds: seconds(ARG_ACTIVATION_TTL, 3 * 24 * 60 * 60),
            authentication_ttl_seconds: seconds(ARG_AUTHENTICATION_TTL, 24 * 60 * 60),
            password_reset_ttl_seconds: seconds(ARG_PASSWORD_RESET_TTL, 15 * 60),
        }
    }

    #[must_use]
    pub const fn config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_activation_ttl_seconds(self.activation_ttl_seconds)
            .with_authentication_ttl_seconds(self.authentication_ttl_seconds)
            .with_password_reset_ttl_seconds(self.password_reset_ttl_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACTIVATION_TTL)
                .long(ARG_ACTIVATION_TTL)
                .help("Activation token TTL in seconds")
                .env("GREENLIGHT_ACTIVATION_TOKEN_TTL_SECONDS")
                .default_value("259200")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_AUTHENTICATION_TTL)
                .long(ARG_AUTHENTICATION_TTL)
                .help("Authentication token TTL in seconds")
                .env("GREENLIGHT_AUTHENTICATION_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL)
                .long(ARG_PASSWORD_RESET_TTL)
                .help("Password reset token TTL in seconds")
                .env("GREENLIGHT_PASSWORD_RESET_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
