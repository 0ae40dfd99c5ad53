//! Postgres backend against a real database in a container.
//!
//! Run with: cargo test --test postgres_store_tests -- --ignored

mod common;

use std::sync::Arc;

use anyhow::{Context, Result};
use job_crawler::testing::{listing, listings, ScriptedSource};
use job_crawler::{JobStore, LifecycleStatus, PostgresJobStore, RunStatus};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::common::{init_tracing, keywords, orchestrator};

/// One container per test binary; each test works on its own id prefix.
struct SharedPostgres {
    db_url: String,
    _container: ContainerAsync<Postgres>,
}

static SHARED: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        init_tracing();

        let container = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let store = PostgresJobStore::connect(&db_url).await?;
        store.migrate().await?;

        Ok(Self {
            db_url,
            _container: container,
        })
    }

    async fn store() -> Arc<PostgresJobStore> {
        let shared = SHARED
            .get_or_init(|| async { Self::init().await.expect("Failed to start shared Postgres") })
            .await;
        Arc::new(
            PostgresJobStore::connect(&shared.db_url)
                .await
                .expect("Failed to connect to Postgres"),
        )
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn upsert_and_read_back_document() {
    let store = SharedPostgres::store().await;
    store.health_check().await.unwrap();

    let source = Arc::new(ScriptedSource::new().pages("pg-upsert", vec![listings("pgu", 3)]));
    let summary = orchestrator(&source, store.clone())
        .run(&keywords(&["pg-upsert"]), 1, CancellationToken::new())
        .await;
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.total().new, 3);

    let record = store.get("pgu-1").await.unwrap().unwrap();
    assert_eq!(record.fields.title, "pgu engineer 1");
    assert_eq!(record.status, LifecycleStatus::New);

    let many = store
        .get_many(&["pgu-0".to_string(), "pgu-2".to_string(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(many.len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn rerun_is_idempotent_in_postgres() {
    let store = SharedPostgres::store().await;
    let source = Arc::new(ScriptedSource::new().pages("pg-idem", vec![listings("pgi", 5)]));

    orchestrator(&source, store.clone())
        .run(&keywords(&["pg-idem"]), 1, CancellationToken::new())
        .await;
    let second = orchestrator(&source, store.clone())
        .run(&keywords(&["pg-idem"]), 1, CancellationToken::new())
        .await;

    assert_eq!(second.total().unchanged, 5);
    assert_eq!(second.total().new, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn keyword_union_and_raw_capture_persist() {
    let store = SharedPostgres::store().await;
    let source = Arc::new(
        ScriptedSource::new()
            .pages("pg-a", vec![vec![listing("pg-shared", "Platform engineer")]])
            .pages("pg-b", vec![vec![listing("pg-shared", "Platform engineer")]]),
    );

    orchestrator(&source, store.clone())
        .run(&keywords(&["pg-a", "pg-b"]), 2, CancellationToken::new())
        .await;

    let record = store.get("pg-shared").await.unwrap().unwrap();
    assert!(record.keywords.contains("pg-a"));
    assert!(record.keywords.contains("pg-b"));

    let raw_pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_pages WHERE keyword IN ('pg-a', 'pg-b')")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(raw_pages, 2);
}
