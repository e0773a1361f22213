use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::{config::StripeConfig, error::ApiError};

/// Provider-hosted checkout session. Stripe can omit the URL for sessions
/// that are not in an open state.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Black-box payment provider capability: current price for a catalog
/// lookup key, and creation of a hosted checkout session.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn price_for_lookup_key(&self, lookup_key: &str) -> Result<String, ApiError>;

    async fn create_checkout_session(
        &self,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ApiError>;
}

pub struct StripeBilling {
    config: StripeConfig,
    client: Client,
}

impl StripeBilling {
    pub fn new(config: StripeConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct PriceList {
    data: Vec<Price>,
}

#[derive(Debug, Deserialize)]
struct Price {
    id: String,
}

fn provider_unreachable(op: &str, e: reqwest::Error) -> ApiError {
    error!(error = %e, op, "payment provider unreachable");
    ApiError::Upstream("The payment provider is unavailable.".into())
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn price_for_lookup_key(&self, lookup_key: &str) -> Result<String, ApiError> {
        let url = format!("{}/v1/prices", self.config.api_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .query(&[("lookup_keys[]", lookup_key), ("active", "true")])
            .send()
            .await
            .map_err(|e| provider_unreachable("price lookup", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "price lookup rejected");
            return Err(ApiError::Upstream(
                "The payment provider rejected the price lookup.".into(),
            ));
        }

        let prices: PriceList = response.json().await.map_err(|e| {
            error!(error = %e, "malformed price list response");
            ApiError::Upstream("The payment provider returned unusable data.".into())
        })?;

        let price = prices.data.into_iter().next().ok_or_else(|| {
            error!(lookup_key, "no price configured for lookup key");
            ApiError::Upstream("No price is configured for this product.".into())
        })?;

        debug!(price_id = %price.id, lookup_key, "price resolved");
        Ok(price.id)
    }

    async fn create_checkout_session(
        &self,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ApiError> {
        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let form = [
            ("mode", "subscription"),
            ("billing_address_collection", "auto"),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| provider_unreachable("checkout session", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "checkout session creation rejected");
            return Err(ApiError::Upstream(
                "The payment provider could not create a checkout session.".into(),
            ));
        }

        let session: CheckoutSession = response.json().await.map_err(|e| {
            error!(error = %e, "malformed checkout session response");
            ApiError::Upstream("The payment provider returned unusable data.".into())
        })?;

        info!(session_id = %session.id, "checkout session created");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        routing::{get, post},
        Json, Router,
    };
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve stub");
        });
        format!("http://{}", addr)
    }

    fn billing(base_url: String) -> StripeBilling {
        StripeBilling::new(StripeConfig {
            secret_key: "sk_test_stub".into(),
            api_base_url: base_url,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn resolves_price_and_creates_session() {
        let captured: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let cap = captured.clone();
        let app = Router::new()
            .route(
                "/v1/prices",
                get(|| async { Json(serde_json::json!({"data": [{"id": "price_123"}]})) }),
            )
            .route(
                "/v1/checkout/sessions",
                post(move |body: String| {
                    let cap = cap.clone();
                    async move {
                        *cap.lock().expect("lock") = Some(body);
                        Json(serde_json::json!({"id": "cs_1", "url": "https://pay/cs_1"}))
                    }
                }),
            );
        let stripe = billing(serve(app).await);

        let price_id = stripe.price_for_lookup_key("pro").await.expect("price");
        assert_eq!(price_id, "price_123");

        let session = stripe
            .create_checkout_session(&price_id, "https://ok", "https://cancel")
            .await
            .expect("session");
        assert_eq!(session.id, "cs_1");
        assert_eq!(session.url.as_deref(), Some("https://pay/cs_1"));

        let form = captured.lock().expect("lock").clone().expect("captured form");
        assert!(form.contains("mode=subscription"));
        assert!(form.contains("%5Bprice%5D=price_123"));
        assert!(form.contains("%5Bquantity%5D=1"));
    }

    #[tokio::test]
    async fn missing_price_is_an_upstream_error() {
        let app = Router::new().route(
            "/v1/prices",
            get(|| async { Json(serde_json::json!({"data": []})) }),
        );
        let stripe = billing(serve(app).await);

        let err = stripe.price_for_lookup_key("pro").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn provider_rejection_is_an_upstream_error() {
        let app = Router::new().route(
            "/v1/checkout/sessions",
            post(|| async {
                (
                    axum::http::StatusCode::PAYMENT_REQUIRED,
                    Json(serde_json::json!({"error": {"message": "account inactive"}})),
                )
            }),
        );
        let stripe = billing(serve(app).await);

        let err = stripe
            .create_checkout_session("price_123", "https://ok", "https://cancel")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn unreachable_provider_is_an_upstream_error() {
        // Nothing listens on the fake state's port.
        let stripe = billing("http://127.0.0.1:9".into());
        let err = stripe.price_for_lookup_key("pro").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
