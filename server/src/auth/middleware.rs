use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use jsonwebtoken::errors::ErrorKind;

use crate::auth::jwt::{self, Claims};
use crate::hub::UserId;
use crate::state::AppState;

/// Cookie the admin panel stores the session token in.
pub const SESSION_COOKIE: &str = "jwt_token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no session token")]
    Missing,
    #[error("session token expired")]
    Expired,
    #[error("session token invalid: {0}")]
    Invalid(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(err),
        }
    }
}

/// Find the session token: `jwt_token` cookie first, then a Bearer header,
/// then a `token` query parameter.
fn extract_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value);

    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    };

    let from_query = || {
        query?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "token")
            .map(|(_, value)| value)
    };

    from_cookie
        .or_else(from_bearer)
        .or_else(from_query)
        .filter(|token| !token.is_empty())
}

/// Resolve the authenticated user of a request.
pub fn resolve_identity(
    secret: &[u8],
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<Claims, AuthError> {
    let token = extract_token(headers, query).ok_or(AuthError::Missing)?;
    Ok(jwt::validate_session_token(secret, token)?)
}

/// Authenticated caller of a REST endpoint.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: UserId,
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = resolve_identity(&state.jwt_secret, &parts.headers, parts.uri.query())
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected unauthenticated request");
                StatusCode::UNAUTHORIZED
            })?;

        Ok(SessionUser {
            user_id: claims.user_id,
        })
    }
}
