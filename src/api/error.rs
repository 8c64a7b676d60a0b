//! Client-facing error taxonomy.
//!
//! Every failure a handler or middleware can surface renders as
//! `{"error": ...}` JSON. Store and driver details are logged, never sent.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{collections::BTreeMap, time::Duration};
use tracing::{error, warn};

use crate::data;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("invalid or missing authentication token")]
    InvalidToken,
    #[error("you must be authenticated to access this resource")]
    Unauthenticated,
    #[error("your user account must be activated to access this resource")]
    NotActivated,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("failed validation")]
    Validation(BTreeMap<String, String>),
    #[error("{0}")]
    BadRequest(String),
    #[error("the server is temporarily unable to process your request")]
    Unavailable,
    #[error("the server encountered a problem and could not process your request")]
    Internal,
}

impl ApiError {
    /// Single-field validation failure.
    #[must_use]
    pub fn field(key: &str, message: &str) -> Self {
        Self::Validation(BTreeMap::from([(key.to_string(), message.to_string())]))
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidCredentials | Self::InvalidToken | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotActivated | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<data::Error> for ApiError {
    fn from(err: data::Error) -> Self {
        match err {
            data::Error::NotFound => Self::NotFound,
            data::Error::DuplicateEmail => {
                Self::field("email", "a user with this email address already exists")
            }
            data::Error::EditConflict => Self::EditConflict,
            data::Error::StoreUnavailable => {
                warn!("store unavailable");
                Self::Unavailable
            }
            data::Error::Internal(err) => {
                error!("internal error: {err:#}");
                Self::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();

        match &self {
            Self::InvalidToken => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            Self::RateLimited { retry_after } => {
                // Whole seconds, rounded up so clients never retry too early.
                let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(1)));
            }
            _ => {}
        }

        let body = match self {
            Self::Validation(errors) => json!({ "error": errors }),
            other => json!({ "error": other.to_string() }),
        };

        (status, headers, Json(body)).into_response()
    }
}
