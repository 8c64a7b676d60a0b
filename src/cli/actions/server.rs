use std::time::Duration;

use crate::{
    api,
    auth::{AuthConfig, RateLimitConfig},
    cli::{commands::database, telemetry},
};
use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub database: database::Options,
    pub limiter: RateLimitConfig,
    pub auth: AuthConfig,
    pub shutdown_grace: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the DSN is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let dsn = build_dsn(&args.database)?;

    let config = api::ServerConfig {
        port: args.port,
        dsn,
        db_max_connections: args.database.max_open_conns,
        db_max_idle_time: Duration::from_secs(args.database.max_idle_time_seconds),
        limiter: args.limiter,
        auth: args.auth,
        shutdown_grace: args.shutdown_grace,
    };

    let result = api::new(config).await;

    telemetry::shutdown_tracer();

    result
}

/// Inject the separately supplied password into the DSN.
fn build_dsn(options: &database::Options) -> Result<SecretString> {
    let mut dsn = Url::parse(&options.dsn)?;

    if let Some(password) = &options.password {
        dsn.set_password(Some(password.expose_secret()))
            .map_err(|()| anyhow!("Error setting password"))?;
    }

    Ok(SecretString::from(dsn.to_string()))
}

fn log_startup_args(args: &Args) {
    info!(
        listen = %format!("tcp:{}", args.port),
        dsn = %redact_dsn(&args.database.dsn),
        db_max_open_conns = args.database.max_open_conns,
        limiter_enabled = args.limiter.enabled(),
        limiter_rps = args.limiter.rate(),
        limiter_burst = args.limiter.burst(),
        shutdown_grace_seconds = args.shutdown_grace.as_secs(),
        version = env!("CARGO_PKG_VERSION"),
        commit = short_commit(crate::GIT_COMMIT_HASH),
        "Startup configuration"
    );
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
