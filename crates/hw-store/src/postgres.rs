use async_trait::async_trait;
use hw_common::WebhookStatus;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::{Result, StoreError, StoredWebhook, WebhookStore};

/// Stamps `created_at` on first insert only, so listing keeps insertion order
const UPSERT_SQL: &str = r#"
    INSERT INTO webhooks (id, delivery_url, secret, topics, status, failure_count, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, (EXTRACT(EPOCH FROM clock_timestamp()) * 1000000)::BIGINT)
    ON CONFLICT (id) DO UPDATE SET
        delivery_url = EXCLUDED.delivery_url,
        secret = EXCLUDED.secret,
        topics = EXCLUDED.topics,
        status = EXCLUDED.status
"#;

const LIST_SQL: &str =
    "SELECT id, delivery_url, secret, topics, status, failure_count FROM webhooks ORDER BY created_at, id";

pub struct PostgresWebhookStore {
    pool: PgPool,
}

impl PostgresWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                delivery_url TEXT NOT NULL,
                secret TEXT NOT NULL,
                topics TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a record
    pub async fn upsert(&self, record: &StoredWebhook) -> Result<()> {
        let topics = serde_json::to_string(&record.topics)?;
        sqlx::query(UPSERT_SQL)
            .bind(&record.id)
            .bind(&record.delivery_url)
            .bind(&record.secret)
            .bind(topics)
            .bind(record.status.as_str())
            .bind(record.failure_count as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn map_row(row: &PgRow) -> Result<StoredWebhook> {
        let topics: String = row.get("topics");
        let status: String = row.get("status");
        let failure_count: i32 = row.get("failure_count");

        Ok(StoredWebhook {
            id: row.get("id"),
            delivery_url: row.get("delivery_url"),
            secret: row.get("secret"),
            topics: serde_json::from_str(&topics)?,
            status: WebhookStatus::parse(&status).map_err(|e| StoreError::Invalid(e.to_string()))?,
            failure_count: failure_count.max(0) as u32,
        })
    }
}

#[async_trait]
impl WebhookStore for PostgresWebhookStore {
    async fn list(&self) -> Result<Vec<StoredWebhook>> {
        let rows = sqlx::query(LIST_SQL).fetch_all(&self.pool).await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<StoredWebhook>> {
        let row = sqlx::query(
            "SELECT id, delivery_url, secret, topics, status, failure_count FROM webhooks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn save_topics(&self, id: &str, topics: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(topics)?;
        let result = sqlx::query("UPDATE webhooks SET topics = $1 WHERE id = $2")
            .bind(encoded)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        debug!(webhook_id = %id, "Saved webhook topics (PostgreSQL)");
        Ok(())
    }

    async fn increment_failure_count(&self, id: &str) -> Result<u32> {
        let row = sqlx::query(
            "UPDATE webhooks SET failure_count = failure_count + 1 WHERE id = $1 RETURNING failure_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let count: i32 = row.get("failure_count");
        Ok(count.max(0) as u32)
    }

    async fn reset_failure_count(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE webhooks SET failure_count = 0 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
