//! Request identity resolved by the authentication middleware.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::error;

use crate::api::error::ApiError;
use crate::data::User;

/// Who is making the request. Inserted exactly once per request by
/// `middleware::authenticate`.
#[derive(Clone, Debug)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Self>().cloned().ok_or_else(|| {
            // Only reachable if a route was mounted outside the auth chain.
            error!(path = %parts.uri.path(), "request identity missing");
            ApiError::Internal
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn missing_identity_is_an_internal_error() {
        let (mut parts, ()) = Request::builder()
            .uri("/v1/movies")
            .body(())
            .map(Request::into_parts)
            .unwrap_or_else(|_| Request::new(()).into_parts());
        let result = Identity::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(ApiError::Internal)));
    }

    #[tokio::test]
    async fn resolved_identity_is_extracted() {
        let (mut parts, ()) = Request::new(()).into_parts();
        parts.extensions.insert(Identity::Anonymous);
        let result = Identity::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Ok(Identity::Anonymous)));
    }
}
