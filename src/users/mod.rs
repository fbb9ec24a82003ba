use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/public-api", handlers::public_routes())
        .nest("/private", handlers::private_routes())
}
