// Control-call authentication
// Decision: Callers prove membership with the instance prefix plus the shared secret
// Decision: Secrets are compared as SHA-256 digests so the comparison length never depends on input

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use calsync_core::{PREFIX_HEADER, SECRET_HEADER};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{ControlState, ErrorResponse};

/// Machine-readable code returned on a rejected control call.
pub const WRONG_SECRET: &str = "wrong_controlSecret";

pub(crate) fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

/// Rejection for an unauthenticated control call
#[derive(Debug)]
pub struct AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ErrorResponse::new(WRONG_SECRET)
            .into_response(StatusCode::FORBIDDEN)
            .into_response()
    }
}

/// Marker extracted once the caller presented this instance's prefix and secret.
#[derive(Debug, Clone, Copy)]
pub struct ControlAuth;

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl FromRequestParts<ControlState> for ControlAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &ControlState) -> Result<Self, Self::Rejection> {
        let prefix = header(parts, PREFIX_HEADER).unwrap_or_default();
        let secret = header(parts, SECRET_HEADER).unwrap_or_default();

        let prefix_ok = prefix == state.instance.prefix();
        let secret_ok = digest(secret) == state.secret_digest;
        if prefix_ok && secret_ok {
            return Ok(ControlAuth);
        }

        warn!(
            path = %parts.uri.path(),
            prefix_ok,
            "Rejected control call"
        );
        Err(AuthError)
    }
}
