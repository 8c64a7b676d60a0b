//! Per-request auth pipeline.
//!
//! Flow Overview:
//! 1) `rate_limit`: derive the client address, ask the limiter; 429 on deny.
//! 2) `authenticate`: no `Authorization` header means anonymous. Anything
//!    else must be a valid `Bearer` authentication token or the request ends
//!    with 401. Malformed tokens are never downgraded to anonymous.
//! 3) `require_permission`: anonymous is 401, not activated is 403, missing
//!    code is 403.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, warn};

use super::{Admission, AuthState, Identity, permissions, tokens};
use crate::api::error::ApiError;
use crate::data::{Error, Scope};

const UNKNOWN_CLIENT: &str = "unknown";

/// Client address used as the rate limiter key.
///
/// Proxy headers win over the socket peer address.
#[must_use]
pub fn client_address(request: &Request) -> String {
    extract_client_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Admit or reject the request by client address.
pub async fn rate_limit(request: Request, next: Next) -> Response {
    let Some(state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        return ApiError::Internal.into_response();
    };

    let client = client_address(&request);
    match state.limiter().check(&client).await {
        Admission::Allowed => next.run(request).await,
        Admission::Limited { retry_after } => {
            debug!(client, ?retry_after, "request rate limited");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

/// Resolve the bearer token, if any, into an [`Identity`].
pub async fn authenticate(mut request: Request, next: Next) -> Response {
    let Some(state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        return ApiError::Internal.into_response();
    };

    let identity = match bearer_identity(&state, request.headers()).await {
        Ok(identity) => identity,
        Err(err) => return with_vary(err.into_response()),
    };
    request.extensions_mut().insert(identity);

    with_vary(next.run(request).await)
}

async fn bearer_identity(state: &AuthState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(Identity::Anonymous);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| tokens::is_well_formed(token))
        .ok_or(ApiError::InvalidToken)?;

    match state.tokens().verify(token, Scope::Authentication).await {
        Ok(user) => Ok(Identity::User(user)),
        Err(Error::NotFound) => Err(ApiError::InvalidToken),
        Err(err) => Err(err.into()),
    }
}

fn with_vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

/// Gate a handler on `code`. Mounted with
/// `from_fn_with_state("movies:write", require_permission)`.
pub async fn require_permission(
    State(code): State<&'static str>,
    identity: Identity,
    request: Request,
    next: Next,
) -> Response {
    let user = match identity {
        Identity::Anonymous => return ApiError::Unauthenticated.into_response(),
        Identity::User(user) => user,
    };

    if !user.activated {
        return ApiError::NotActivated.into_response();
    }

    let Some(state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        return ApiError::Internal.into_response();
    };

    match permissions::user_has(state.models().permissions.as_ref(), user.id, code).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            warn!(user_id = user.id, code, "permission denied");
            ApiError::Forbidden.into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, RateLimitConfig, RateLimiter};
    use crate::data::{Models, NewUser, memory::MemoryStore};
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::{from_fn, from_fn_with_state},
        routing::get,
    };
    use tower::{ServiceBuilder, ServiceExt};

    struct Harness {
        state: Arc<AuthState>,
        app: Router,
    }

    fn harness(limiter: RateLimitConfig) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let models = Models::from(store);
        let state = Arc::new(AuthState::new(
            AuthConfig::new(),
            models,
            Arc::new(RateLimiter::new(limiter)),
        ));

        let app = Router::new()
            .route("/open", get(|| async { "open" }))
            .route(
                "/read",
                get(|| async { "read" }).route_layer(from_fn_with_state(
                    "movies:read",
                    require_permission,
                )),
            )
            .route(
                "/write",
                get(|| async { "write" }).route_layer(from_fn_with_state(
                    "movies:write",
                    require_permission,
                )),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(Extension(state.clone()))
                    .layer(from_fn(rate_limit))
                    .layer(from_fn(authenticate)),
            );

        Harness { state, app }
    }

    async fn user(state: &AuthState, email: &str, activated: bool, codes: &[&str]) -> String {
        let user = state
            .models()
            .users
            .insert(NewUser {
                name: "Alice".to_string(),
                email: email.to_string(),
                password_hash: "$argon2id$stub".to_string(),
                activated,
            })
            .await
            .unwrap_or_else(|err| panic!("insert user: {err}"));
        state
            .models()
            .permissions
            .add_for_user(user.id, codes)
            .await
            .unwrap_or_else(|err| panic!("grant permissions: {err}"));
        state
            .issue(user.id, Scope::Authentication)
            .await
            .unwrap_or_else(|err| panic!("issue token: {err}"))
            .plaintext
    }

    async fn send(app: &Router, path: &str, auth: Option<&str>) -> Response {
        let mut builder = HttpRequest::builder()
            .uri(path)
            .header("x-forwarded-for", "203.0.113.9");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let request = builder
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("request: {err}"));
        app.clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|err| match err {})
    }

    fn unlimited() -> RateLimitConfig {
        RateLimitConfig::new().with_enabled(false)
    }

    #[tokio::test]
    async fn anonymous_passes_through_open_routes() {
        let harness = harness(unlimited());
        let response = send(&harness.app, "/open", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::VARY),
            Some(&HeaderValue::from_static("Authorization"))
        );
    }

    #[tokio::test]
    async fn malformed_header_is_unauthenticated_not_anonymous() {
        let harness = harness(unlimited());
        for auth in ["Bearer", "Basic abc", "Bearer short", "bearer "] {
            let response = send(&harness.app, "/open", Some(auth)).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{auth}");
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE),
                Some(&HeaderValue::from_static("Bearer"))
            );
        }
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let harness = harness(unlimited());
        let auth = format!("Bearer {}", "A".repeat(tokens::TOKEN_LENGTH));
        let response = send(&harness.app, "/open", Some(&auth)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn activation_token_is_not_a_login_credential() {
        let harness = harness(unlimited());
        let user = harness
            .state
            .models()
            .users
            .insert(NewUser {
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                activated: false,
            })
            .await
            .unwrap_or_else(|err| panic!("insert user: {err}"));
        let token = harness
            .state
            .issue(user.id, Scope::Activation)
            .await
            .unwrap_or_else(|err| panic!("issue token: {err}"));

        let auth = format!("Bearer {}", token.plaintext);
        let response = send(&harness.app, "/open", Some(&auth)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn permission_outcomes_are_distinct() {
        let harness = harness(unlimited());
        let reader = user(&harness.state, "reader@example.com", true, &["movies:read"]).await;
        let inactive = user(&harness.state, "new@example.com", false, &["movies:read"]).await;
        let reader = format!("Bearer {reader}");
        let inactive = format!("Bearer {inactive}");

        let anonymous = send(&harness.app, "/write", None).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let denied = send(&harness.app, "/write", Some(&reader)).await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let allowed = send(&harness.app, "/read", Some(&reader)).await;
        assert_eq!(allowed.status(), StatusCode::OK);

        let not_activated = send(&harness.app, "/read", Some(&inactive)).await;
        assert_eq!(not_activated.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_rejects_before_authentication() {
        let harness = harness(RateLimitConfig::new().with_rate(1.0).with_burst(2));
        assert_eq!(send(&harness.app, "/open", None).await.status(), StatusCode::OK);
        assert_eq!(send(&harness.app, "/open", None).await.status(), StatusCode::OK);

        // A bogus token would be 401, but admission is decided first.
        let response = send(&harness.app, "/open", Some("Bearer bogus")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_some());
    }

    #[test]
    fn client_address_prefers_proxy_headers() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        assert_eq!(client_address(&request), "10.0.0.1");

        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_address(&request), "198.51.100.2");

        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(client_address(&request), "203.0.113.5");
    }

    #[test]
    fn client_address_falls_back_to_unknown() {
        let request = Request::new(Body::empty());
        assert_eq!(client_address(&request), UNKNOWN_CLIENT);
    }
}
