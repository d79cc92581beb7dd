pub mod dto;
pub mod handlers;
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

use axum::Router;

use crate::state::AppState;

/// Account routes, nested under `/users`.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::protected_routes())
}
