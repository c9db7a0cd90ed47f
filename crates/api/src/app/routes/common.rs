use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use walletd_core::LedgerResult;

use crate::app::errors;

/// Serialize a successful result with `status`, or map the error.
pub fn reply<T: Serialize>(status: StatusCode, result: LedgerResult<T>) -> axum::response::Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => errors::ledger_error_to_response(err),
    }
}
