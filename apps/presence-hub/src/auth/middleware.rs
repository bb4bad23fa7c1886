//! Credential extraction for the gateway and admin routes.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::auth::tokens;
use crate::error::ApiError;
use crate::AppState;

/// Cookie consulted when the gateway URL carries no `token` parameter.
pub const ACCESS_COOKIE: &str = "access_token";

/// Authenticated user resolved from an access credential.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
}

/// Missing, unknown and refresh-kind credentials are 401. A store failure
/// propagates as the store's own error.
async fn resolve(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let data = tokens::lookup_access_token(state.kv.as_ref(), token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    Ok(AuthUser {
        user_id: data.user_id,
        username: data.username,
    })
}

/// Extracts the credential from `Authorization: Bearer <token>`.
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;

        resolve(state, token).await
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Gateway identity, taken from the `token` query parameter or the
/// `access_token` cookie. Browsers cannot set headers on a WebSocket
/// handshake, hence no bearer header here.
#[derive(Debug, Clone)]
pub struct GatewayUser(pub AuthUser);

impl FromRequestParts<AppState> for GatewayUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty());

        let token = match from_query {
            Some(token) => token,
            None => CookieJar::from_headers(&parts.headers)
                .get(ACCESS_COOKIE)
                .map(|c| c.value().to_string())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ApiError::unauthorized("Missing access credential"))?,
        };

        resolve(state, &token).await.map(GatewayUser)
    }
}
