use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// One checkout attempt, linking an app to a provider-issued session id.
/// Append-only from this service's perspective; status transitions happen
/// through out-of-band reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingSession {
    pub id: Uuid,
    pub app_id: Uuid,
    pub session_id: String,
    pub status: String,
    pub created_at: OffsetDateTime,
}

impl BillingSession {
    pub async fn create(
        db: &PgPool,
        app_id: Uuid,
        session_id: &str,
    ) -> anyhow::Result<BillingSession> {
        let session = sqlx::query_as::<_, BillingSession>(
            r#"
            INSERT INTO billing_sessions (app_id, session_id)
            VALUES ($1, $2)
            RETURNING id, app_id, session_id, status, created_at
            "#,
        )
        .bind(app_id)
        .bind(session_id)
        .fetch_one(db)
        .await?;
        Ok(session)
    }
}
