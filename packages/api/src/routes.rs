//! The HTTP surface: every feature router nested under `/api`, plus `/health`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware as axum_middleware, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{admin, auth, billing, jobs, messaging, mentorship, middleware, notifications, realtime, social, uploads};

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    // Cheap round trip through the store.
    match state.store.find_user(uuid::Uuid::nil()).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

/// All `/api` routes, without state.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(messaging::router())
        .merge(jobs::router())
        .merge(mentorship::router())
        .merge(social::router())
        .merge(billing::router())
        .merge(uploads::router())
        .merge(notifications::router())
        .merge(admin::router())
        .route("/realtime", get(realtime::connect))
}

/// The complete application. Session handling is layered on by the binary.
pub fn app(state: AppState) -> Router {
    let cors = middleware::cors(&state.settings.server);
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router())
        .layer(axum_middleware::from_fn(middleware::request_tracing))
        .layer(TraceLayer::new_for_http().make_span_with(middleware::trace_span::<axum::body::Body>))
        .layer(cors)
        .with_state(state)
}
