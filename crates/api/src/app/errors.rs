use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;

use walletd_core::LedgerError;

/// Message for any request whose body or path cannot be parsed.
pub const INVALID_INPUT: &str = "Invalid input data";

/// The one place ledger errors become HTTP responses.
pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, msg),
        LedgerError::InvalidArgument(msg) => json_error(StatusCode::BAD_REQUEST, msg),
        LedgerError::Conflict(msg) => json_error(StatusCode::CONFLICT, msg),
        LedgerError::StorageFailure(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "timestamp": Utc::now(),
            "status": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_input() -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, INVALID_INPUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_error_kind_has_its_status() {
        let cases = [
            (LedgerError::not_found("Wallet not found"), StatusCode::NOT_FOUND),
            (LedgerError::invalid("Insufficient funds"), StatusCode::BAD_REQUEST),
            (LedgerError::conflict("Wallet already exists"), StatusCode::CONFLICT),
            (LedgerError::storage("pool closed"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err).status(), status);
        }
    }
}
