use axum::extract::rejection::JsonRejection;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use walletd_core::{UserId, WalletId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub user_id: UserId,
}

/// Body of deposit and withdraw. A missing amount is rejected by the engine
/// like a non-positive one.
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub amount: Option<Decimal>,
}

// -------------------------
// Mapping helpers
// -------------------------

/// Unwrap a JSON body, answering 400 "Invalid input data" when it is malformed.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected request body");
            Err(errors::invalid_input())
        }
    }
}

/// Parse a path id (`UserId`, `WalletId`), answering 400 when malformed.
pub fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, axum::response::Response> {
    raw.parse::<T>().map_err(|_| errors::invalid_input())
}
