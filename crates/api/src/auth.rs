//! Bearer-token authentication.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use domain::Principal;
use store::PrincipalDirectory;

use crate::error::ApiError;
use crate::state::{AppState, CommerceStore};

/// The principal behind the request's `Authorization: Bearer <token>` header.
///
/// Resolution only establishes identity. Whether the principal is active,
/// or holds the right role, is checked by the operation it calls.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Principal);

impl<S: CommerceStore> FromRequestParts<Arc<AppState<S>>> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            metrics::counter!("http_auth_failures_total", "reason" => "missing").increment(1);
            ApiError::Unauthorized("Missing bearer token".to_string())
        })?;

        let principal = state
            .principals
            .principal_for_token(&token)
            .await
            .map_err(|e| ApiError::Checkout(e.into()))?;

        match principal {
            Some(principal) => Ok(AuthenticatedUser(principal)),
            None => {
                metrics::counter!("http_auth_failures_total", "reason" => "unknown").increment(1);
                Err(ApiError::Unauthorized("Invalid token".to_string()))
            }
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}
