use std::collections::HashMap;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gemgate_pool::KeyInput;

use crate::api::pool_summary;
use crate::{ApiError, AppState, error_response};

pub(crate) fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/keys", get(list_keys))
        .route("/keys/reset", post(reset_all_keys))
        .route("/keys/{index}/test", post(test_key))
        .route("/keys/{index}/reset", post(reset_key))
        .route("/stats", get(stats))
        .route("/reload", post(reload))
        .route("/proxy", get(get_proxy).put(put_proxy))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}

async fn admin_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_key.as_deref() else {
        return next.run(req).await;
    };
    match extract_admin_key(&headers, req.uri()) {
        Some(key) if key == expected => next.run(req).await,
        _ => {
            warn!(path = %req.uri().path(), "admin request rejected");
            error_response(
                StatusCode::UNAUTHORIZED,
                "missing or invalid admin key",
                "unauthorized",
            )
        }
    }
}

/// `x-admin-key`, then a Bearer token, then `?admin_key=`. Blank values
/// fall through to the next source.
fn extract_admin_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    header_admin_key(headers)
        .or_else(|| bearer_admin_key(headers))
        .or_else(|| query_admin_key(uri))
}

fn header_admin_key(headers: &HeaderMap) -> Option<String> {
    non_blank(headers.get("x-admin-key")?.to_str().ok()?)
}

fn bearer_admin_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_blank(token)
}

fn query_admin_key(uri: &Uri) -> Option<String> {
    let params: HashMap<String, String> = serde_urlencoded::from_str(uri.query()?).ok()?;
    non_blank(params.get("admin_key")?)
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

async fn list_keys(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.gateway.pool().snapshot();
    Json(serde_json::json!({
        "total": snapshot.total,
        "available": snapshot.available,
        "keys": snapshot.keys,
    }))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.gateway.pool().snapshot();
    Json(serde_json::json!({
        "pool": pool_summary(&snapshot),
        "gateway": state.gateway.stats(),
    }))
}

async fn test_key(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Response, ApiError> {
    let probe = state.gateway.probe_key(index).await?;
    Ok(Json(probe).into_response())
}

async fn reset_key(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Response, ApiError> {
    state.gateway.reset_key(index)?;
    Ok(Json(serde_json::json!({ "ok": true, "index": index })).into_response())
}

async fn reset_all_keys(State(state): State<AppState>) -> impl IntoResponse {
    let reset = state.gateway.reset_all();
    Json(serde_json::json!({ "ok": true, "reset": reset }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReloadBody {
    Inputs(Vec<KeyInput>),
    Keys(Vec<String>),
    Wrapped { keys: Vec<KeyInput> },
}

impl ReloadBody {
    fn into_inputs(self) -> Vec<KeyInput> {
        match self {
            ReloadBody::Inputs(inputs) | ReloadBody::Wrapped { keys: inputs } => inputs,
            ReloadBody::Keys(keys) => keys.into_iter().map(KeyInput::manual).collect(),
        }
    }
}

async fn reload(State(state): State<AppState>, body: Bytes) -> Response {
    let inputs = match serde_json::from_slice::<ReloadBody>(&body) {
        Ok(body) => body.into_inputs(),
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("expected a JSON list of keys: {err}"),
                "invalid_request_error",
            );
        }
    };
    let loaded = state.gateway.reload(inputs);
    Json(serde_json::json!({ "ok": true, "loaded": loaded })).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
struct ProxyBody {
    #[serde(default)]
    proxy: Option<String>,
}

async fn get_proxy(State(state): State<AppState>) -> impl IntoResponse {
    Json(ProxyBody {
        proxy: state.gateway.proxy().get(),
    })
}

async fn put_proxy(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match serde_json::from_slice::<ProxyBody>(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid proxy body: {err}"),
                "invalid_request_error",
            );
        }
    };
    state.gateway.proxy().set(payload.proxy);
    let proxy = state.gateway.proxy().get();
    info!(proxy = proxy.as_deref().unwrap_or("none"), "outbound proxy updated");
    Json(ProxyBody { proxy }).into_response()
}
