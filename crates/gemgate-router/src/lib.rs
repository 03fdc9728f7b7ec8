//! HTTP surface: OpenAI-compatible routes, status/health, and the admin API.

mod admin;
mod api;
mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tracing::info;

use gemgate_core::{Gateway, GatewayError};
use gemgate_protocol::openai::ErrorResponse;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// When set, every `/admin` route requires it.
    pub admin_key: Option<String>,
    /// Listen port, echoed on the status page.
    pub port: Option<u16>,
}

pub fn gateway_router(state: AppState) -> Router {
    Router::new()
        .merge(api::api_router())
        .nest("/admin", admin::admin_router(state.clone()))
        .layer(middleware::from_fn(cors))
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

/// [`GatewayError`] rendered as the OpenAI error envelope.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_response())).into_response()
    }
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>, kind: &str) -> Response {
    (status, Json(ErrorResponse::new(message, kind, None))).into_response()
}

const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization";

async fn cors(req: Request<Body>, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    response
}

async fn trace_requests(req: Request<Body>, next: Next) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(req).await;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms,
        "request handled"
    );
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}
