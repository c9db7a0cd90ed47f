use axum::Router;

pub mod common;
pub mod system;
pub mod users;
pub mod wallets;

/// Router for all resource endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/users", users::router())
        .nest("/wallets", wallets::router())
}
