use axum::{extract::State, routing::post, Json, Router};
use axum_extra::extract::WithRejection;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::{
    apps::repo::App,
    auth::extractors::CurrentUser,
    error::{is_unique_violation, ApiError},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/apps", post(create_app).get(list_apps))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAppRequest {
    pub name: String,
    pub slug: String,
}

fn is_valid_slug(slug: &str) -> bool {
    lazy_static! {
        static ref SLUG_RE: Regex = Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap();
    }
    SLUG_RE.is_match(slug)
}

#[instrument(skip_all)]
pub async fn create_app(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(payload), _): WithRejection<Json<CreateAppRequest>, ApiError>,
) -> Result<Json<App>, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        warn!("app creation with blank name");
        return Err(ApiError::InvalidBody("Please provide an app name.".into()));
    }

    if !is_valid_slug(&payload.slug) {
        warn!(slug = %payload.slug, "app creation with invalid slug");
        return Err(ApiError::InvalidBody(
            "Slugs are lowercase letters, digits and hyphens.".into(),
        ));
    }

    let app = match App::create(&state.db, user.id, &payload.slug, name).await {
        Ok(app) => app,
        Err(e) if is_unique_violation(&e) => {
            warn!(slug = %payload.slug, "app slug already taken");
            return Err(ApiError::AlreadyExists(
                "An app with this slug already exists.".into(),
            ));
        }
        Err(e) => return Err(ApiError::Internal(e)),
    };

    info!(app_id = %app.id, owner_id = %user.id, "app created");
    Ok(Json(app))
}

#[instrument(skip_all)]
pub async fn list_apps(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<App>>, ApiError> {
    let apps = App::list_by_owner(&state.db, user.id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(apps))
}
