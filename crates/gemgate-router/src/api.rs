use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::Serialize;

use gemgate_core::{ChatOutcome, GatewayStatus};
use gemgate_pool::PoolSnapshot;
use gemgate_protocol::openai::CreateChatCompletionRequestBody;

use crate::sse::sse_response;
use crate::{ApiError, AppState, error_response};

pub(crate) fn api_router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/models", get(list_models))
        .route("/", get(status))
        .route("/status", get(status))
        .route("/health", get(health))
}

async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Response {
    // Parsed by hand so malformed bodies get the OpenAI error envelope.
    let request: CreateChatCompletionRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {err}"),
                "invalid_request_error",
            );
        }
    };

    match state.gateway.chat_completion(request).await {
        Ok(ChatOutcome::Json(response)) => Json(response).into_response(),
        Ok(ChatOutcome::Stream(frames)) => sse_response(frames),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.models())
}

#[derive(Serialize)]
struct StatusBody {
    service: &'static str,
    version: &'static str,
    port: Option<u16>,
    #[serde(flatten)]
    status: GatewayStatus,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusBody {
        service: "gemgate",
        version: env!("CARGO_PKG_VERSION"),
        port: state.port,
        status: state.gateway.status(),
    })
}

async fn health(State(state): State<AppState>) -> Response {
    let snapshot = state.gateway.pool().snapshot();
    let code = if snapshot.available == 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(pool_summary(&snapshot))).into_response()
}

/// Aggregate counters without the per-key list.
pub(crate) fn pool_summary(snapshot: &PoolSnapshot) -> serde_json::Value {
    let mut value = serde_json::to_value(snapshot).unwrap_or_default();
    if let Some(object) = value.as_object_mut() {
        object.remove("keys");
    }
    value
}
