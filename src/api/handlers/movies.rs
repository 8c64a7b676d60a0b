//! Catalog routes. Catalog storage is served elsewhere; these handlers sit
//! behind the permission gate and answer with fixed bodies.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

pub const READ_PERMISSION: &str = "movies:read";
pub const WRITE_PERMISSION: &str = "movies:write";

pub async fn list_movies() -> impl IntoResponse {
    Json(json!({ "movies": [] }))
}

pub async fn create_movie() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({ "error": "catalog writes are not available on this instance" })),
    )
}
