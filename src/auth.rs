use crate::config::ApiConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

/// Public routes that never require `x-api-key`/`Authorization`.
const UNAUTHENTICATED_PATHS: &[&str] = &["/health"];

/// Primary auth boundary for the API: every route except
/// [`UNAUTHENTICATED_PATHS`] and CORS preflight requires a valid key.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let method = request.method().clone();
    let path = request.uri().path();
    let client_ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if !auth_state.config.enable_auth {
        return Ok(next.run(request).await);
    }

    if method == Method::OPTIONS || UNAUTHENTICATED_PATHS.contains(&path) {
        return Ok(next.run(request).await);
    }

    let provided_key = if let Some(header_value) = headers.get("x-api-key") {
        header_value.to_str().map_err(|_| unauthorized())?
    } else if let Some(header_value) = headers.get("authorization") {
        let auth_str = header_value.to_str().map_err(|_| unauthorized())?;
        match auth_str.strip_prefix("Bearer ") {
            Some(token) => token,
            None => {
                warn!(%path, %client_ip, "authorization header missing Bearer prefix");
                return Err(unauthorized());
            }
        }
    } else {
        warn!(%path, %client_ip, "missing API key");
        return Err(unauthorized());
    };

    match &auth_state.config.api_key {
        Some(expected_key) => {
            use subtle::ConstantTimeEq;
            if provided_key.as_bytes().ct_eq(expected_key.as_bytes()).into() {
                Ok(next.run(request).await)
            } else {
                warn!(%path, %client_ip, "authentication failed: invalid key");
                Err(unauthorized())
            }
        }
        None => {
            warn!("auth enabled but no API key configured");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response())
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}
