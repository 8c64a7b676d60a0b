use std::time::Duration;

use crate::cli::{
    actions::{Action, server::Args},
    commands::{self, auth, database, limiter},
};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(4000);
    let shutdown_grace = Duration::from_secs(
        matches
            .get_one::<u64>(commands::ARG_SHUTDOWN_GRACE)
            .copied()
            .unwrap_or(30),
    );

    Ok(Action::Server(Args {
        port,
        database: database::Options::parse(matches)?,
        limiter: limiter::Options::parse(matches).config(),
        auth: auth::Options::parse(matches).config(),
        shutdown_grace,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_builds_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "greenlight",
            "--dsn",
            "postgres://greenlight@localhost/greenlight",
            "--port",
            "9000",
            "--shutdown-grace-seconds",
            "5",
            "--limiter-burst",
            "8",
        ]);

        let Action::Server(args) = handler(&matches).expect("action");
        assert_eq!(args.port, 9000);
        assert_eq!(args.shutdown_grace, Duration::from_secs(5));
        assert_eq!(args.limiter.burst(), 8);
        assert_eq!(args.database.max_open_conns, 25);
    }
}
