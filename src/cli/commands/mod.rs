pub mod auth;
pub mod database;
pub mod limiter;
pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_SHUTDOWN_GRACE: &str = "shutdown-grace-seconds";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("greenlight")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("4000")
                .env("GREENLIGHT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SHUTDOWN_GRACE)
                .long(ARG_SHUTDOWN_GRACE)
                .help("Seconds to wait for in-flight requests and background tasks on shutdown")
                .default_value("30")
                .env("GREENLIGHT_SHUTDOWN_GRACE_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        );

    let command = database::with_args(command);
    let command = limiter::with_args(command);
    let command = auth::with_args(command);
    logging::with_args(command)
}
