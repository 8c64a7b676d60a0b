use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_DSN: &str = "dsn";
pub const ARG_DB_PASSWORD: &str = "db-password";
pub const ARG_DB_MAX_OPEN_CONNS: &str = "db-max-open-conns";
pub const ARG_DB_MAX_IDLE_TIME: &str = "db-max-idle-time-seconds";

#[derive(Debug)]
pub struct Options {
    pub dsn: String,
    pub password: Option<SecretString>,
    pub max_open_conns: u32,
    pub max_idle_time_seconds: u64,
}

impl Options {
    /// Parse database arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the DSN is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let dsn = match matches.get_one::<String>(ARG_DSN).cloned() {
            Some(value) if !value.trim().is_empty() => value,
            _ => anyhow::bail!("missing required argument: --{ARG_DSN}"),
        };

        let password = matches
            .get_one::<String>(ARG_DB_PASSWORD)
            .filter(|value| !value.is_empty())
            .map(|value| SecretString::from(value.clone()));

        Ok(Self {
            dsn,
            password,
            max_open_conns: matches
                .get_one::<u32>(ARG_DB_MAX_OPEN_CONNS)
                .copied()
                .unwrap_or(25),
            max_idle_time_seconds: matches
                .get_one::<u64>(ARG_DB_MAX_IDLE_TIME)
                .copied()
                .unwrap_or(900),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. When --db-password is set it replaces the password in the DSN, so the DSN itself can stay credential free.",
                )
                .env("GREENLIGHT_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_DB_PASSWORD)
                .long(ARG_DB_PASSWORD)
                .help("Database password, injected into the DSN")
                .env("GREENLIGHT_DB_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_DB_MAX_OPEN_CONNS)
                .long(ARG_DB_MAX_OPEN_CONNS)
                .help("Maximum open database connections")
                .env("GREENLIGHT_DB_MAX_OPEN_CONNS")
                .default_value("25")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_DB_MAX_IDLE_TIME)
                .long(ARG_DB_MAX_IDLE_TIME)
                .help("Close pooled connections idle for longer than this")
                .env("GREENLIGHT_DB_MAX_IDLE_TIME_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
}
