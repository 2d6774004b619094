use deadpool_postgres::{Config, CreatePoolError, Pool, PoolError, Runtime};
use pharmachain_common::TrackerError;
use serde_json::Value;
use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::info;

use super::DocumentStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id BIGSERIAL PRIMARY KEY,
        collection TEXT NOT NULL,
        doc JSONB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS documents_doc_idx ON documents USING GIN (doc jsonb_path_ops);
    CREATE INDEX IF NOT EXISTS documents_collection_idx ON documents (collection);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("creating pool: {0}")]
    CreatePool(#[from] CreatePoolError),
    #[error("pool: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

impl From<StoreError> for TrackerError {
    fn from(err: StoreError) -> Self {
        TrackerError::StoreFailed(err.to_string())
    }
}

/// Documents kept as JSONB rows in a single table keyed by collection.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let config = Config {
            url: Some(database_url.to_string()),
            ..Default::default()
        };
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        let client = pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("document store schema ready");
        Ok(Self { pool })
    }

    async fn find(&self, collection: &str, filter: &Value) -> Result<Option<Value>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM documents WHERE collection = $1 AND doc @> $2::jsonb ORDER BY id LIMIT 1",
                &[&collection, filter],
            )
            .await?;
        Ok(row.map(|row| row.get::<_, Value>(0)))
    }

    /// Merge `patch` into the document matching `filter`, or insert one.
    /// With a `version`, a matching document is only touched if its own
    /// version is missing or lower.
    async fn merge(
        &self,
        collection: &str,
        filter: &Value,
        patch: &Value,
        version: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        // Serializes writers per collection so two inserts for one filter
        // cannot both miss the update.
        tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&collection])
            .await?;
        let updated = match version {
            None => {
                tx.execute(
                    "UPDATE documents SET doc = doc || $3::jsonb \
                     WHERE collection = $1 AND doc @> $2::jsonb",
                    &[&collection, filter, patch],
                )
                .await?
            }
            Some(version) => {
                tx.execute(
                    "UPDATE documents SET doc = doc || $3::jsonb \
                     WHERE collection = $1 AND doc @> $2::jsonb \
                     AND COALESCE((doc->>'version')::bigint, -1) < $4",
                    &[&collection, filter, patch, &version],
                )
                .await?
            }
        };
        if updated == 0 {
            let exists = tx
                .query_opt(
                    "SELECT 1 FROM documents WHERE collection = $1 AND doc @> $2::jsonb LIMIT 1",
                    &[&collection, filter],
                )
                .await?
                .is_some();
            if !exists {
                tx.execute(
                    "INSERT INTO documents (collection, doc) VALUES ($1, $2::jsonb || $3::jsonb)",
                    &[&collection, filter, patch],
                )
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

impl DocumentStore for PgStore {
    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>, TrackerError> {
        Ok(self.find(collection, &filter).await?)
    }

    async fn upsert(&self, collection: &str, filter: Value, patch: Value) -> Result<(), TrackerError> {
        Ok(self.merge(collection, &filter, &patch, None).await?)
    }

    async fn upsert_versioned(
        &self,
        collection: &str,
        filter: Value,
        patch: Value,
        version: u64,
    ) -> Result<(), TrackerError> {
        let version = i64::try_from(version).unwrap_or(i64::MAX);
        Ok(self.merge(collection, &filter, &patch, Some(version)).await?)
    }
}
