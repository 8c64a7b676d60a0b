//! Registration, activation, and password reset completion.
//!
//! Flow Overview:
//! 1) `register`: validate, hash, insert, grant `movies:read`, issue an
//!    activation token, and email it in the background.
//! 2) `activate`: look up the activation token, flip `activated` through the
//!    versioned update, then delete the user's activation tokens. A conflict
//!    leaves the token usable for a retry.
//! 3) `update_password`: redeem the reset token, rehash, versioned update,
//!    then revoke every authentication token the user holds.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::{hash_password, send_email};
use crate::api::error::ApiError;
use crate::auth::AuthState;
use crate::background::BackgroundTasks;
use crate::data::{self, NewUser, Scope, User};
use crate::mailer::{Mailer, Message};
use crate::validator::{
    Validator, validate_email, validate_name, validate_password_plaintext,
    validate_token_plaintext,
};

const DEFAULT_PERMISSIONS: [&str; 1] = ["movies:read"];

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ActivateRequest {
    pub token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordUpdateRequest {
    pub password: String,
    pub token: String,
}

#[derive(Serialize, ToSchema)]
pub struct UserEnvelope {
    pub user: User,
}

#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = RegisterRequest,
    responses(
        (status = 202, description = "User created; activation email queued", body = UserEnvelope),
        (status = 400, description = "Malformed JSON body"),
        (status = 422, description = "Validation failed or email already registered"),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn register(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(background): Extension<BackgroundTasks>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let email = request.email.trim().to_string();

    let mut v = Validator::new();
    validate_name(&mut v, &request.name);
    validate_email(&mut v, &email);
    validate_password_plaintext(&mut v, &request.password);
    v.finish().map_err(ApiError::Validation)?;

    let password_hash = hash_password(request.password).await?;
    let user = state
        .models()
        .users
        .insert(NewUser {
            name: request.name,
            email,
            password_hash,
            activated: false,
        })
        .await?;

    state
        .models()
        .permissions
        .add_for_user(user.id, &DEFAULT_PERMISSIONS)
        .await?;

    let token = state.issue(user.id, Scope::Activation).await?;
    info!(user_id = user.id, "user registered");

    send_email(
        &background,
        mailer,
        user.email.clone(),
        Message::Welcome {
            user_id: user.id,
            activation_token: token.plaintext,
        },
    );

    Ok((StatusCode::ACCEPTED, Json(UserEnvelope { user })))
}

#[utoipa::path(
    put,
    path = "/v1/users/activated",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "User activated", body = UserEnvelope),
        (status = 409, description = "Concurrent edit; retry"),
        (status = 422, description = "Invalid or expired activation token"),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn activate(
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &request.token);
    v.finish().map_err(ApiError::Validation)?;

    let mut user = match state
        .tokens()
        .verify(&request.token, Scope::Activation)
        .await
    {
        Ok(user) => user,
        Err(data::Error::NotFound) => {
            return Err(ApiError::field(
                "token",
                "invalid or expired activation token",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    user.activated = true;
    let user = state.models().users.update(&user).await?;
    state
        .tokens()
        .delete_all_for_user(user.id, Scope::Activation)
        .await?;
    info!(user_id = user.id, "user activated");

    Ok(Json(UserEnvelope { user }))
}

#[utoipa::path(
    put,
    path = "/v1/users/password",
    request_body = PasswordUpdateRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 409, description = "Concurrent edit; retry"),
        (status = 422, description = "Invalid password or expired reset token"),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn update_password(
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<PasswordUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let mut v = Validator::new();
    validate_password_plaintext(&mut v, &request.password);
    validate_token_plaintext(&mut v, &request.token);
    v.finish().map_err(ApiError::Validation)?;

    let mut user = match state
        .tokens()
        .redeem(&request.token, Scope::PasswordReset)
        .await
    {
        Ok(user) => user,
        Err(data::Error::NotFound) => {
            return Err(ApiError::field(
                "token",
                "invalid or expired password reset token",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    user.password_hash = hash_password(request.password).await?;
    let user = state.models().users.update(&user).await?;

    // Sessions opened with the old password end here.
    state
        .tokens()
        .delete_all_for_user(user.id, Scope::Authentication)
        .await?;
    info!(user_id = user.id, "password reset");

    Ok(Json(
        json!({ "message": "your password was successfully reset" }),
    ))
}
