use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

/// App record in the database. Owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct App {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_at: OffsetDateTime,
}

impl App {
    pub fn owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<App>> {
        let app = sqlx::query_as::<_, App>(
            r#"
            SELECT id, owner_id, slug, name, created_at
            FROM apps
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(app)
    }

    pub async fn list_by_owner(db: &PgPool, owner_id: Uuid) -> anyhow::Result<Vec<App>> {
        let apps = sqlx::query_as::<_, App>(
            r#"
            SELECT id, owner_id, slug, name, created_at
            FROM apps
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(db)
        .await?;
        Ok(apps)
    }

    pub async fn create(
        db: &PgPool,
        owner_id: Uuid,
        slug: &str,
        name: &str,
    ) -> anyhow::Result<App> {
        let app = sqlx::query_as::<_, App>(
            r#"
            INSERT INTO apps (owner_id, slug, name)
            VALUES ($1, $2, $3)
            RETURNING id, owner_id, slug, name, created_at
            "#,
        )
        .bind(owner_id)
        .bind(slug)
        .bind(name)
        .fetch_one(db)
        .await?;
        Ok(app)
    }

    /// Load an app and check the caller owns it. The sole authorization
    /// gate for app-scoped operations. A missing app reports the same
    /// `Forbidden` as a foreign one, so callers cannot probe for ids.
    pub async fn find_owned(db: &PgPool, app_id: Uuid, user_id: Uuid) -> Result<App, ApiError> {
        let app = Self::find_by_id(db, app_id)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| {
                warn!(app_id = %app_id, "app not found");
                ApiError::Forbidden("You do not have access to this app.".into())
            })?;

        if !app.owned_by(user_id) {
            warn!(app_id = %app.id, user_id = %user_id, "app owned by someone else");
            return Err(ApiError::Forbidden(
                "You do not have access to this app.".into(),
            ));
        }

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_app(owner_id: Uuid) -> App {
        App {
            id: Uuid::new_v4(),
            owner_id,
            slug: "my-app".into(),
            name: "My App".into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn ownership_check() {
        let owner = Uuid::new_v4();
        let app = make_app(owner);
        assert!(app.owned_by(owner));
        assert!(!app.owned_by(Uuid::new_v4()));
    }
}
