//! PostgreSQL document backend.
//!
//! Each record is a JSONB document keyed by identity. Status and timestamps
//! are duplicated into columns for indexing; the document is authoritative.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::JobStore;
use crate::error::{StorageError, StoreResult};
use crate::types::{JobRecord, RawPage};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool sized for the crawler's write rate.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        info!("Database connected");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("migrations failed: {e}")))?;
        info!("Migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode(document: serde_json::Value) -> StoreResult<JobRecord> {
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> StoreResult<()> {
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StorageError::Unavailable(format!("query failed: {e}"))),
            Err(_) => Err(StorageError::Unavailable(format!(
                "query timeout (>{}s)",
                HEALTH_CHECK_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query("SELECT document FROM job_listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(r.get("document"))).transpose()
    }

    async fn get_many(&self, ids: &[String]) -> StoreResult<HashMap<String, JobRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query("SELECT id, document FROM job_listings WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| Ok((r.get::<String, _>("id"), decode(r.get("document"))?)))
            .collect()
    }

    async fn upsert(&self, record: &JobRecord) -> StoreResult<()> {
        let document = serde_json::to_value(record)?;
        sqlx::query(
            r#"
            INSERT INTO job_listings (id, document, status, first_seen, last_seen, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                document = EXCLUDED.document,
                status = EXCLUDED.status,
                first_seen = EXCLUDED.first_seen,
                last_seen = EXCLUDED.last_seen,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(document)
        .bind(record.status.as_str())
        .bind(record.first_seen)
        .bind(record.last_seen)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match StorageError::from(e) {
            StorageError::WriteConflict { message, .. } => StorageError::WriteConflict {
                id: record.id.clone(),
                message,
            },
            other => other,
        })?;

        debug!(id = %record.id, status = record.status.as_str(), "Upserted job listing");
        Ok(())
    }

    async fn scan(&self) -> StoreResult<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT document FROM job_listings ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| decode(r.get("document"))).collect()
    }

    async fn capture_raw(&self, page: &RawPage) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_pages (run_date, keyword, page, payload, fetched_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_date, keyword, page) DO UPDATE SET
                payload = EXCLUDED.payload,
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(page.fetched_at.date_naive())
        .bind(&page.keyword)
        .bind(page.page as i32)
        .bind(serde_json::Value::Array(page.items.clone()))
        .bind(page.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
