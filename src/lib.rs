//! # Greenlight (movie catalog API)
//!
//! The catalog is fronted by a token-authenticated, permission-gated HTTP API.
//!
//! ## Request pipeline
//!
//! Every request passes, in order, through per-client rate admission
//! (token bucket keyed by client address), bearer-token authentication
//! (absent header is anonymous, anything invalid is `401`), and for gated
//! routes a permission check (`401` anonymous, `403` inactive or lacking the
//! code).
//!
//! ## Tokens
//!
//! Tokens are 32 random bytes, base64url encoded. Only their SHA-256 hash is
//! stored. Each token has a single scope (`activation`, `authentication`,
//! `password-reset`); activation and reset tokens are single use and at most
//! one of each is live per user.
//!
//! ## Shutdown
//!
//! On SIGINT/SIGTERM the listener stops, in-flight requests get a grace
//! period, and tracked background tasks (emails) are drained before exit.

pub mod api;
pub mod auth;
pub mod background;
pub mod cli;
pub mod data;
pub mod mailer;
pub mod validator;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
