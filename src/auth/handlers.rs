use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, CookieJar},
    WithRejection,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{PublicUser, SignInRequest, SignUpRequest},
        extractors::{CurrentUser, SESSION_COOKIE},
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo::User,
    },
    error::{is_unique_violation, ApiError},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user/sign-up", post(sign_up))
        .route("/user/sign-in", post(sign_in))
        .route("/user", get(current_user))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .build()
}

#[instrument(skip(state, jar, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(mut payload), _): WithRejection<Json<SignUpRequest>, ApiError>,
) -> Result<(CookieJar, Json<PublicUser>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!("sign-up with malformed email");
        return Err(ApiError::InvalidBody(
            "Please provide a valid email address.".into(),
        ));
    }

    if payload.password.len() < 8 {
        warn!("sign-up with short password");
        return Err(ApiError::InvalidBody(
            "Your password must be at least 8 characters long.".into(),
        ));
    }

    let name = payload.name.trim();
    if name.is_empty() {
        warn!("sign-up with blank name");
        return Err(ApiError::InvalidBody("Please provide a name.".into()));
    }

    let hash = hash_password(&payload.password).map_err(ApiError::Internal)?;

    let user = match User::create(&state.db, &payload.email, name, &hash).await {
        Ok(user) => user,
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %payload.email, "sign-up for existing email");
            return Err(ApiError::AlreadyExists(
                "A user with this email already exists.".into(),
            ));
        }
        Err(e) => return Err(ApiError::Internal(e)),
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id).map_err(ApiError::Internal)?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((
        jar.add(session_cookie(token)),
        Json(PublicUser::from(user)),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(mut payload), _): WithRejection<Json<SignInRequest>, ApiError>,
) -> Result<(CookieJar, Json<PublicUser>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    // Uniform failure for unknown email and wrong password.
    let invalid = || ApiError::Unauthenticated("Invalid email or password.".into());

    let user = User::find_by_email(&state.db, &payload.email)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| {
            warn!("sign-in with unknown email");
            invalid()
        })?;

    let ok = verify_password(&payload.password, &user.password_hash).map_err(ApiError::Internal)?;
    if !ok {
        warn!(user_id = %user.id, "sign-in with wrong password");
        return Err(invalid());
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id).map_err(ApiError::Internal)?;

    info!(user_id = %user.id, "user signed in");
    Ok((
        jar.add(session_cookie(token)),
        Json(PublicUser::from(user)),
    ))
}

#[instrument(skip_all)]
pub async fn current_user(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(user))
}
