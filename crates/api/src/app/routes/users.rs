use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use walletd_core::UserId;

use crate::app::dto;
use crate::app::routes::common::reply;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_user))
        .route("/:id", get(get_user))
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::CreateUserRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::CREATED,
        services.create_user(body.username, body.email).await,
    )
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::OK, services.get_user(user_id).await)
}
