use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtKeys, repo::User},
    error::ApiError,
    state::AppState,
};

/// Cookie the session token is carried in. A `Bearer` header is accepted
/// as an alternative carrier for non-browser clients.
pub const SESSION_COOKIE: &str = "authorization";

/// Verified token identity: the claimed user id, nothing loaded yet.
pub struct AuthUser(pub Uuid);

/// Verified identity with the user row loaded. Fails `Unauthenticated`
/// when the token is missing or invalid, or the user no longer exists.
pub struct CurrentUser(pub User);

fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .ok_or_else(|| ApiError::Unauthenticated("Missing session token.".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(&token).map_err(|_| {
            warn!("invalid or expired session token");
            ApiError::Unauthenticated("Invalid or expired session token.".into())
        })?;

        Ok(AuthUser(claims.sub))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;

        let user = User::find_by_id(&state.db, user_id)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| {
                warn!(user_id = %user_id, "token references a missing user");
                ApiError::Unauthenticated("Unknown user.".into())
            })?;

        Ok(CurrentUser(user))
    }
}
