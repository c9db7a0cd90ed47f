use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use walletd_core::WalletId;

use crate::app::dto;
use crate::app::routes::common::reply;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_wallet))
        .route("/transfers", post(transfer))
        .route("/:id", get(get_wallet))
        .route("/:id/deposit", post(deposit))
        .route("/:id/withdraw", post(withdraw))
        .route("/:id/balance", get(get_balance))
        .route("/:id/transactions", get(list_transactions))
}

pub async fn create_wallet(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::CreateWalletRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::CREATED, services.create_wallet(body.user_id).await)
}

pub async fn get_wallet(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let wallet_id: WalletId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::OK, services.get_wallet(wallet_id).await)
}

pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    payload: Result<Json<dto::AmountRequest>, JsonRejection>,
) -> axum::response::Response {
    let wallet_id: WalletId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::OK, services.deposit(wallet_id, body.amount).await)
}

pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    payload: Result<Json<dto::AmountRequest>, JsonRejection>,
) -> axum::response::Response {
    let wallet_id: WalletId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::OK, services.withdraw(wallet_id, body.amount).await)
}

pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::TransferRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        services
            .transfer(body.from_wallet_id, body.to_wallet_id, body.amount)
            .await,
    )
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let wallet_id: WalletId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::OK, services.get_balance(wallet_id).await)
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let wallet_id: WalletId = match dto::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        services
            .list_transactions(wallet_id)
            .await
            .map(|items| json!({ "items": items })),
    )
}
