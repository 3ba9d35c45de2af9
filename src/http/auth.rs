//! Bearer-token auth middleware (`SPEC_FULL.md` §4.7).
//!
//! Grounded in `verify_api_key` from the original source: disabled by
//! default; missing credential is 401, wrong credential is 403. Applied
//! only to the protected routes — `/health` and `/ready` are mounted
//! outside this layer.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::SharedState;
use crate::error::ApiError;

pub async fn require_auth(
    State(state): State<SharedState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.auth.enabled {
        return Ok(next.run(req).await);
    }

    let expected = state
        .config
        .auth
        .bearer_token
        .as_deref()
        .expect("AuthConfig::from_env guarantees a token when enabled");

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        None => Err(ApiError::Unauthorized),
        Some(token) if token == expected => Ok(next.run(req).await),
        Some(_) => Err(ApiError::Forbidden),
    }
}
