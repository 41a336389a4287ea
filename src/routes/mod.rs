pub mod health;
pub mod messages;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // Anthropic-style API, also reachable without the /v1 prefix
    let api_routes = Router::new().route("/messages", post(messages::messages));

    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/messages", post(messages::messages))
        .nest("/v1", api_routes)
        .with_state(state)
}
