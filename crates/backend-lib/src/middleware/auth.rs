// ============================
// crates/backend-lib/src/middleware/auth.rs
// ============================
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use repogate_common::{decode_basic_header, FORWARDED_HOST, FORWARDED_PROTO};
use tracing::debug;

use crate::{error::AppError, AppState};

/// Basic-auth guard
///
/// Lets the request through only when the gateway accepts its credentials
/// for the requested host.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();
    let Some(host) = request_host(headers) else {
        debug!("request without a host");
        return Err(AppError::Unauthorized);
    };
    let taint = is_insecure(headers);
    let credentials = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic_header)
        .ok_or(AppError::Unauthorized)?;

    // Dropping the zeroizing buffer wipes the decoded credentials.
    let granted = state.gateway.authorized(&host, &credentials, taint).await;
    drop(credentials);

    if !granted? {
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// Host the proxy forwarded for, else the `Host` header
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_HOST)
        .or_else(|| headers.get(header::HOST))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// Whether the client reached the proxy over plain HTTP
pub fn is_insecure(headers: &HeaderMap) -> bool {
    headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("http"))
}
