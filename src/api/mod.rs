//! API layer -- axum routes, handlers, and shared state.

mod routes;
mod state;
pub mod types;

pub use state::AppState;

use axum::Router;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    routes::api_routes(state).fallback(fallback)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
