use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    apps::repo::App,
    auth::extractors::CurrentUser,
    billing::repo::BillingSession,
    error::ApiError,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/billing/checkout", get(checkout))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutQuery {
    pub app: Uuid,
}

fn redirect_target(session_url: Option<String>, cancel_url: &str) -> String {
    session_url.unwrap_or_else(|| cancel_url.to_string())
}

/// Initiate a subscription checkout for an owned app. Each step
/// short-circuits the whole operation; nothing is retried.
#[instrument(skip_all)]
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Query(query), _): WithRejection<Query<CheckoutQuery>, ApiError>,
) -> Result<Redirect, ApiError> {
    let app = App::find_owned(&state.db, query.app, user.id).await?;

    let checkout = &state.config.checkout;
    let price_id = state
        .billing
        .price_for_lookup_key(&checkout.price_lookup_key)
        .await?;
    let session = state
        .billing
        .create_checkout_session(&price_id, &checkout.success_url, &checkout.cancel_url)
        .await?;

    // The provider-side session already exists at this point. If the local
    // write fails, the orphaned session is left for out-of-band
    // reconciliation; it is not retried or compensated here.
    BillingSession::create(&state.db, app.id, &session.id)
        .await
        .map_err(ApiError::Internal)?;

    info!(app_id = %app.id, session_id = %session.id, "checkout session recorded");
    Ok(Redirect::to(&redirect_target(
        session.url,
        &checkout.cancel_url,
    )))
}

#[cfg(test)]
mod tests {
    use super::redirect_target;
    use crate::{app::build_app, state::AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn falls_back_to_cancel_url_when_provider_omits_one() {
        assert_eq!(
            redirect_target(Some("https://pay/cs_1".into()), "https://cancel"),
            "https://pay/cs_1"
        );
        assert_eq!(redirect_target(None, "https://cancel"), "https://cancel");
    }

    #[tokio::test]
    async fn checkout_requires_session_token() {
        let req = Request::builder()
            .method("GET")
            .uri("/billing/checkout?app=4a72c147-8627-41a5-8e85-9f1b6b2c8f11")
            .body(Body::empty())
            .expect("request");
        let res = build_app(AppState::fake())
            .oneshot(req)
            .await
            .expect("infallible");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("read body");
        let v: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(v["code"], "unauthenticated");
    }
}
