use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};

use crate::auth::RateLimitConfig;

pub const ARG_LIMITER_RPS: &str = "limiter-rps";
pub const ARG_LIMITER_BURST: &str = "limiter-burst";
pub const ARG_LIMITER_ENABLED: &str = "limiter-enabled";

#[must_use]
pub fn validator_rate() -> ValueParser {
    ValueParser::from(move |rate: &str| -> std::result::Result<f64, String> {
        match rate.parse::<f64>() {
            Ok(parsed) if parsed.is_finite() && parsed > 0.0 => Ok(parsed),
            _ => Err("rate must be a positive number".to_string()),
        }
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub rps: f64,
    pub burst: u32,
    pub enabled: bool,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            rps: matches.get_one::<f64>(ARG_LIMITER_RPS).copied().unwrap_or(2.0),
            burst: matches.get_one::<u32>(ARG_LIMITER_BURST).copied().unwrap_or(4),
            enabled: matches
                .get_one::<bool>(ARG_LIMITER_ENABLED)
                .copied()
                .unwrap_or(true),
        }
    }

    #[must_use]
    pub const fn config(&self) -> RateLimitConfig {
        RateLimitConfig::new()
            .with_rate(self.rps)
            .with_burst(self.burst)
            .with_enabled(self.enabled)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LIMITER_RPS)
                .long(ARG_LIMITER_RPS)
                .help("Rate limiter maximum requests per second per client")
                .env("GREENLIGHT_LIMITER_RPS")
                .default_value("2")
                .value_parser(validator_rate()),
        )
        .arg(
            Arg::new(ARG_LIMITER_BURST)
                .long(ARG_LIMITER_BURST)
                .help("Rate limiter maximum burst per client")
                .env("GREENLIGHT_LIMITER_BURST")
                .default_value("4")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LIMITER_ENABLED)
                .long(ARG_LIMITER_ENABLED)
                .help("Enable the per-client rate limiter")
                .env("GREENLIGHT_LIMITER_ENABLED")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
}
