//! Token issuing endpoints and logout.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use super::{send_email, verify_dummy_password, verify_password};
use crate::api::error::ApiError;
use crate::auth::{AuthState, Identity, Token};
use crate::background::BackgroundTasks;
use crate::data::{self, Scope, User, retry_read};
use crate::mailer::{Mailer, Message};
use crate::validator::{Validator, validate_email, validate_password_plaintext};

#[derive(Deserialize, ToSchema)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthenticationTokenEnvelope {
    pub authentication_token: Token,
}

async fn find_by_email(state: &AuthState, email: &str) -> data::Result<User> {
    let users = &state.models().users;
    retry_read(|| users.get_by_email(email)).await
}

#[utoipa::path(
    post,
    path = "/v1/tokens/authentication",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Authentication token issued", body = AuthenticationTokenEnvelope),
        (status = 401, description = "Invalid credentials"),
        (status = 422, description = "Validation failed"),
    ),
    tag = "tokens"
)]
#[instrument(skip_all)]
pub async fn create_authentication_token(
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let email = request.email.trim();

    let mut v = Validator::new();
    validate_email(&mut v, email);
    validate_password_plaintext(&mut v, &request.password);
    v.finish().map_err(ApiError::Validation)?;

    // Unknown email and wrong password are the same answer.
    let user = match find_by_email(&state, email).await {
        Ok(user) => user,
        Err(data::Error::NotFound) => {
            verify_dummy_password(request.password).await?;
            return Err(ApiError::InvalidCredentials);
        }
        Err(err) => return Err(err.into()),
    };

    if !verify_password(request.password, user.password_hash.clone()).await? {
        debug!(user_id = user.id, "password mismatch");
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.issue(user.id, Scope::Authentication).await?;
    info!(user_id = user.id, "authentication token issued");

    Ok((
        StatusCode::CREATED,
        Json(AuthenticationTokenEnvelope {
            authentication_token: token,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/tokens/activation",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Activation email queued"),
        (status = 422, description = "Unknown email or already activated"),
    ),
    tag = "tokens"
)]
#[instrument(skip_all)]
pub async fn create_activation_token(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(background): Extension<BackgroundTasks>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let email = request.email.trim();

    let mut v = Validator::new();
    validate_email(&mut v, email);
    v.finish().map_err(ApiError::Validation)?;

    let user = match find_by_email(&state, email).await {
        Ok(user) => user,
        Err(data::Error::NotFound) => {
            return Err(ApiError::field("email", "no matching email address found"));
        }
        Err(err) => return Err(err.into()),
    };

    if user.activated {
        return Err(ApiError::field("email", "user has already been activated"));
    }

    let token = state.issue(user.id, Scope::Activation).await?;
    send_email(
        &background,
        mailer,
        user.email,
        Message::Activation {
            activation_token: token.plaintext,
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "an email will be sent to you containing activation instructions"
        })),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/tokens/password-reset",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Reset email queued when the account exists"),
        (status = 422, description = "Validation failed"),
    ),
    tag = "tokens"
)]
#[instrument(skip_all)]
pub async fn create_password_reset_token(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(background): Extension<BackgroundTasks>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let email = request.email.trim();

    let mut v = Validator::new();
    validate_email(&mut v, email);
    v.finish().map_err(ApiError::Validation)?;

    // Same response whether or not the account exists.
    match find_by_email(&state, email).await {
        Ok(user) if user.activated => {
            let token = state.issue(user.id, Scope::PasswordReset).await?;
            send_email(
                &background,
                mailer,
                user.email,
                Message::PasswordReset {
                    reset_token: token.plaintext,
                },
            );
        }
        Ok(user) => debug!(user_id = user.id, "password reset for inactive account skipped"),
        Err(data::Error::NotFound) => debug!("password reset for unknown email skipped"),
        Err(err) => return Err(err.into()),
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "an email will be sent to you containing password reset instructions"
        })),
    ))
}

#[utoipa::path(
    delete,
    path = "/v1/tokens/authentication",
    responses(
        (status = 200, description = "All authentication tokens of the caller revoked"),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer" = [])),
    tag = "tokens"
)]
#[instrument(skip_all)]
pub async fn delete_authentication_tokens(
    Extension(state): Extension<Arc<AuthState>>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let Identity::User(user) = identity else {
        return Err(ApiError::Unauthenticated);
    };

    state
        .tokens()
        .delete_all_for_user(user.id, Scope::Authentication)
        .await?;
    info!(user_id = user.id, "signed out of all sessions");

    Ok(Json(json!({ "message": "signed out" })))
}
