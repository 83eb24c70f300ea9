//! HTTP surface: stream endpoints, health, app trigger, latest snapshot and
//! static assets.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::metrics::now_rfc3339;
use crate::sse::{logs_stream, metrics_stream};
use crate::state::AppState;
use crate::types::HealthPayload;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/events", get(metrics_stream))
        .route("/logs", get(logs_stream))
        .route("/metrics", get(latest_metrics))
        .route("/health", get(health))
        .route("/trigger-app", get(trigger_app).post(trigger_app));
    if let Some(dir) = &state.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health() -> Response {
    match now_rfc3339() {
        Ok(time) => Json(HealthPayload { ok: true, time }).into_response(),
        Err(e) => {
            warn!("health clock formatting failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Kicks off an app restart in the background and acknowledges immediately.
async fn trigger_app(State(state): State<AppState>) -> Response {
    let Some(command) = state.relay.command() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no app command configured").into_response();
    };
    info!(command = %command, "app restart requested");
    let relay = state.relay.clone();
    tokio::spawn(async move {
        relay.restart().await;
    });
    (StatusCode::OK, "app restart triggered").into_response()
}

async fn latest_metrics(State(state): State<AppState>) -> Response {
    let cached = state.last_json.read().await.clone();
    match cached {
        Some(json) => (
            [(header::CONTENT_TYPE, "application/json")],
            json.to_string(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no snapshot yet").into_response(),
    }
}
