//! Authentication middleware
//!
//! Protected routes require HTTP Basic credentials, checked against the
//! directory on every request.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dirgate_auth::Credential;
use tracing::debug;

use crate::server::AppState;

/// Authentication gate for protected routes
///
/// On success the [`Principal`](dirgate_auth::Principal) is stored in the
/// request extensions. Missing or rejected credentials get a `401` with a
/// Basic challenge; a directory outage gets a `503` so clients do not
/// mistake it for a bad password.
pub async fn require_authentication(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(credential) = basic_credential(request.headers()) else {
        debug!("No usable Basic credentials on {}", request.uri().path());
        return challenge(&state.realm);
    };

    match state
        .authenticator
        .verify(&credential.username, &credential.password)
        .await
    {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) if e.is_outage() => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Authentication service unavailable",
        )
            .into_response(),
        Err(_) => challenge(&state.realm),
    }
}

/// Extract Basic credentials from the `Authorization` header
pub fn basic_credential(headers: &HeaderMap) -> Option<Credential> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;

    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;
    Some(Credential::new(username, password))
}

fn challenge(realm: &str) -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    let value = HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    response
}
