//! HTTP surface of Carepass: two-factor login over a server-side session,
//! and the encrypted hospital dashboard behind it.

pub mod at_rest;
pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod middleware;
pub mod records;
pub mod sequencer;
pub mod session;

use axum::{
    Json, Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::auth::AppState;

/// All Carepass routes. Layers such as CORS and tracing are added by the
/// binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/login", post(auth::login))
        .route("/api/verify", post(auth::verify))
        .route("/api/resend", post(auth::resend))
        .route("/logout", post(auth::logout))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/dashboard", get(records::dashboard))
        .route("/api/search", get(records::search))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ));

    public_routes.merge(protected_routes).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
