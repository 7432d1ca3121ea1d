//! Dashboard web server — OAuth login and token management UI.

pub mod routes;
pub mod session;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
