use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub cancel_url: String,
    pub price_lookup_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    pub checkout: CheckoutConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        // Rotating the secret invalidates every outstanding session token.
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "launchsite".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "launchsite-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 30),
        };
        let stripe = StripeConfig {
            secret_key: std::env::var("STRIPE_SECRET_KEY")?,
            api_base_url: std::env::var("STRIPE_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
        };
        let checkout = CheckoutConfig {
            success_url: std::env::var("CHECKOUT_SUCCESS_URL")?,
            cancel_url: std::env::var("CHECKOUT_CANCEL_URL")?,
            price_lookup_key: std::env::var("PRICE_LOOKUP_KEY").unwrap_or_else(|_| "pro".into()),
        };
        Ok(Self {
            database_url,
            jwt,
            stripe,
            checkout,
        })
    }
}
