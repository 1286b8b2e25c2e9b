use crate::audit::{AuditEntry, AuditSink};
use crate::config::DatabaseConfig;
use crate::entity::{EntityDraft, FoodRecord, ImageRecord, NewEntity, PeerReviewRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Relational storage for entity rows.
///
/// Field validation happens before `insert`; the repository trusts its input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Insert a row into the entity's table, returning the assigned id
    async fn insert(&self, entity: &NewEntity) -> Result<i64>;

    /// Foods owned by `owner_id` that `viewer_id` may read
    async fn list_foods(&self, owner_id: &str, viewer_id: &str) -> Result<Vec<FoodRecord>>;

    /// A single food, `None` when missing or private to someone else
    async fn get_food(&self, id: i64, viewer_id: &str) -> Result<Option<FoodRecord>>;

    /// Images `viewer_id` may read, newest first
    async fn list_images(&self, viewer_id: &str) -> Result<Vec<ImageRecord>>;

    /// Peer reviews `viewer_id` may read, newest first
    async fn list_peer_reviews(&self, viewer_id: &str) -> Result<Vec<PeerReviewRecord>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed repository and audit sink
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a new repository with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for PgRepository {
    #[instrument(skip(self, entity), fields(table = entity.draft.kind().table(), owner_id = %entity.owner_id))]
    async fn insert(&self, entity: &NewEntity) -> Result<i64> {
        let id: i64 = match &entity.draft {
            EntityDraft::Food(food) => sqlx::query_scalar(
                r#"
                INSERT INTO foods (user_id, name, description, rating, image_url, is_public)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(&entity.owner_id)
            .bind(food.name.trim())
            .bind(&food.description)
            .bind(food.rating)
            .bind(&entity.blob_path)
            .bind(entity.is_public)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert food")?,

            EntityDraft::Image(image) => sqlx::query_scalar(
                r#"
                INSERT INTO images (created_by, description, filepath, is_public)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(&entity.owner_id)
            .bind(&image.description)
            .bind(&entity.blob_path)
            .bind(entity.is_public)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert image")?,

            EntityDraft::PeerReview(review) => {
                if entity.blob_path.is_some() {
                    bail!("peer_reviews has no blob column");
                }
                let reviewee = review.reviewee.as_deref().unwrap_or(&entity.owner_id);

                sqlx::query_scalar(
                    r#"
                    INSERT INTO peer_reviews (created_by, reviewee, review, is_public)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(&entity.owner_id)
                .bind(reviewee)
                .bind(Json(review.review.clone()))
                .bind(entity.is_public)
                .fetch_one(&self.pool)
                .await
                .context("Failed to insert peer review")?
            }
        };

        debug!(id, blob_path = ?entity.blob_path, "Entity inserted");

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn list_foods(&self, owner_id: &str, viewer_id: &str) -> Result<Vec<FoodRecord>> {
        let foods = sqlx::query_as::<_, FoodRecord>(
            r#"
            SELECT id, user_id, name, description, rating, image_url,
                   is_public, created_at, updated_at
            FROM foods
            WHERE user_id = $1
              AND (is_public OR user_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query foods")?;

        Ok(foods)
    }

    #[instrument(skip(self))]
    async fn get_food(&self, id: i64, viewer_id: &str) -> Result<Option<FoodRecord>> {
        let food = sqlx::query_as::<_, FoodRecord>(
            r#"
            SELECT id, user_id, name, description, rating, image_url,
                   is_public, created_at, updated_at
            FROM foods
            WHERE id = $1
              AND (is_public OR user_id = $2)
            "#,
        )
        .bind(id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query food")?;

        Ok(food)
    }

    #[instrument(skip(self))]
    async fn list_images(&self, viewer_id: &str) -> Result<Vec<ImageRecord>> {
        let images = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, created_by, description, filepath,
                   is_public, created_at, updated_at
            FROM images
            WHERE is_public OR created_by = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query images")?;

        Ok(images)
    }

    #[instrument(skip(self))]
    async fn list_peer_reviews(&self, viewer_id: &str) -> Result<Vec<PeerReviewRecord>> {
        let reviews = sqlx::query_as::<_, PeerReviewRecord>(
            r#"
            SELECT id, created_by, reviewee, review,
                   is_public, created_at, updated_at
            FROM peer_reviews
            WHERE is_public OR created_by = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query peer reviews")?;

        Ok(reviews)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgRepository {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_usage_records (called_by, api_name, called_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(&entry.called_by)
        .bind(&entry.api_name)
        .execute(&self.pool)
        .await
        .context("Failed to insert api usage record")?;

        Ok(())
    }
}
