pub mod auth;
mod chats;
mod error;

pub use error::{ApiError, ErrorCode};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/request-code", post(auth::request_code))
        .route("/verify-code", post(auth::verify_code));

    // Chat routes (bearer token required, enforced by the Auth extractor)
    let chat_routes = Router::new()
        .route("/", get(chats::list_chats))
        .route("/send", post(chats::send_message));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/chats", chat_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
