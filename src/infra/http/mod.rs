//! Inbound HTTP surface.
//!
//! - `GET /api/{provider}/{endpoint}?..` dispatches a request
//! - `DELETE /api/{provider}/{endpoint}?..` invalidates its cache entry
//! - `GET /health` lists provider circuit state

pub mod error;
pub mod handlers;
pub mod middleware;
mod state;

pub use error::{ApiError, codes};
pub use state::AppState;

use axum::{Router, middleware as axum_middleware, routing::get};

use self::middleware::{log_responses, set_request_context};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/{provider}/{endpoint}",
            get(handlers::dispatch).delete(handlers::invalidate),
        )
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
