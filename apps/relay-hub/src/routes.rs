use std::path::Path;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_proto::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::warn;

use crate::{session::ws_handler, state::SharedState};

/// Builds the hub's router. Static files, when configured, answer every path
/// the API does not claim.
pub fn router(state: SharedState, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/data", post(ingest_sensor))
        .route("/latest", get(latest_sensor))
        .route("/sos", get(sos_status))
        .route("/sos/activate", post(activate_sos))
        .route("/sos/deactivate", post(deactivate_sos))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .with_state(state);

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct IngestQuery {
    role: Option<String>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    received: Value,
    delivered: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn ingest_sensor(
    State(state): State<SharedState>,
    Query(query): Query<IngestQuery>,
    body: Option<Json<Value>>,
) -> Response {
    let Some(Json(body)) = body else {
        return bad_request("body must be a JSON object");
    };
    let Value::Object(data) = body else {
        warn!("rejected non-object sensor payload");
        return bad_request("body must be a JSON object");
    };

    let scope = match query.role.as_deref() {
        Some(raw) => match state.policy.recognise(raw) {
            Some(role) => Some(role.clone()),
            None => return bad_request(format!("unknown role {raw:?}")),
        },
        None => None,
    };

    let (snapshot, report) = state.ingest_sensor(data, scope.as_ref());
    Json(IngestResponse {
        status: "ok",
        received: Value::Object(snapshot.data),
        delivered: report.delivered,
    })
    .into_response()
}

async fn latest_sensor(State(state): State<SharedState>) -> impl IntoResponse {
    match state.sensor.current() {
        Some(snapshot) => Json(json!({
            "data": snapshot.data,
            "updated_at": snapshot.updated_at,
        })),
        None => Json(json!({ "data": null, "updated_at": null })),
    }
}

async fn sos_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "sos": state.sos.is_active() }))
}

async fn activate_sos(State(state): State<SharedState>) -> impl IntoResponse {
    state.set_sos(true);
    Json(json!({ "message": "SOS Activated", "sos": true }))
}

async fn deactivate_sos(State(state): State<SharedState>) -> impl IntoResponse {
    state.set_sos(false);
    Json(json!({ "message": "SOS Deactivated", "sos": false }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": now_millis(),
        "service": "relay-hub",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.stats())
}

async fn metrics(State(state): State<SharedState>) -> Response {
    match state.render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
