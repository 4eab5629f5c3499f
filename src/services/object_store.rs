//! src/services/object_store.rs
//!
//! Typed data access for the two row kinds the gateway persists: `objects`
//! (metadata) and `chunks` (payload slices). There is no business logic here;
//! callers decide when rows are read or written. The production binding is
//! SQLite through `sqlx`, with the configured `synchronous` level standing in
//! for the consistency a write reaches before it is acknowledged.

use crate::{
    config::StoreConfig,
    models::{
        chunk::Chunk,
        object::{ObjectId, ObjectMeta},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    types::Json,
};
use std::{collections::BTreeMap, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    ObjectNotFound(ObjectId),
    #[error("chunk {num} of object `{id}` not found")]
    ChunkNotFound { id: ObjectId, num: u64 },
    #[error("object `{0}` already exists")]
    ObjectExists(ObjectId),
    #[error("chunk {num} of object `{id}` already exists")]
    ChunkExists { id: ObjectId, num: u64 },
    #[error("content length {0} does not fit the store")]
    LengthOutOfRange(u64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row-level contract the transfer service depends on.
///
/// Every method is a single point lookup, count or insert. Nothing here is
/// atomic with anything else: `object_exists` followed by `put_object_meta`
/// can interleave with another writer.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the metadata row, or `ObjectNotFound`.
    async fn get_object_meta(&self, id: &ObjectId) -> StoreResult<ObjectMeta>;

    /// Count lookup on the metadata row.
    async fn object_exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Insert a new metadata row. The creation time is assigned by the store.
    /// Never updates an existing row.
    async fn put_object_meta(
        &self,
        id: &ObjectId,
        content_length: u64,
        metadata: &BTreeMap<String, String>,
    ) -> StoreResult<()>;

    /// Read the chunk at `num`, or `ChunkNotFound`.
    async fn get_chunk(&self, id: &ObjectId, num: u64) -> StoreResult<Bytes>;

    /// Insert a new chunk row. Empty buffers are skipped without a write.
    async fn put_chunk(&self, id: &ObjectId, num: u64, data: &[u8]) -> StoreResult<()>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// SQLite-backed `ObjectStore`.
///
/// Cloning is cheap; every clone shares the same connection pool.
#[derive(Clone)]
pub struct SqliteObjectStore {
    pool: SqlitePool,
}

impl SqliteObjectStore {
    /// Open the pool described by `cfg`.
    ///
    /// WAL journaling lets readers proceed while a PUT is appending chunks.
    pub async fn connect(cfg: &StoreConfig) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(&cfg.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(cfg.consistency.into())
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    /// Create the `objects` and `chunks` tables if they are missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close every pooled connection. Waits for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn get_object_meta(&self, id: &ObjectId) -> StoreResult<ObjectMeta> {
        sqlx::query_as::<_, ObjectMeta>(
            "SELECT bucket, name, content_length, created, metadata
             FROM objects WHERE bucket = ? AND name = ?",
        )
        .bind(id.bucket())
        .bind(id.name())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound(id.clone()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn object_exists(&self, id: &ObjectId) -> StoreResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket = ? AND name = ?")
                .bind(id.bucket())
                .bind(id.name())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn put_object_meta(
        &self,
        id: &ObjectId,
        content_length: u64,
        metadata: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let length = i64::try_from(content_length)
            .map_err(|_| StoreError::LengthOutOfRange(content_length))?;

        sqlx::query(
            "INSERT INTO objects (bucket, name, content_length, created, metadata)
             VALUES (?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?)",
        )
        .bind(id.bucket())
        .bind(id.name())
        .bind(length)
        .bind(Json(metadata))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::ObjectExists(id.clone())
            } else {
                StoreError::Sqlx(err)
            }
        })?;
        Ok(())
    }

    async fn get_chunk(&self, id: &ObjectId, num: u64) -> StoreResult<Bytes> {
        let chunk = sqlx::query_as::<_, Chunk>(
            "SELECT num, data FROM chunks WHERE bucket = ? AND name = ? AND num = ?",
        )
        .bind(id.bucket())
        .bind(id.name())
        .bind(num as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::ChunkNotFound {
            id: id.clone(),
            num,
        })?;
        debug_assert_eq!(chunk.num, num as i64);
        Ok(Bytes::from(chunk.data))
    }

    async fn put_chunk(&self, id: &ObjectId, num: u64, data: &[u8]) -> StoreResult<()> {
        if data.is_empty() {
            debug!("skip empty chunk {}::{}", id, num);
            return Ok(());
        }

        sqlx::query("INSERT INTO chunks (bucket, name, num, data) VALUES (?, ?, ?, ?)")
            .bind(id.bucket())
            .bind(id.name())
            .bind(num as i64)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::ChunkExists {
                        id: id.clone(),
                        num,
                    }
                } else {
                    StoreError::Sqlx(err)
                }
            })?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Consistency;

    /// Fresh in-memory store with the schema applied.
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub(crate) async fn memory_store() -> SqliteObjectStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = SqliteObjectStore { pool };
        store.migrate().await.expect("schema");
        store
    }

    fn id(bucket: &str, name: &str) -> ObjectId {
        ObjectId::new(bucket, name).expect("valid id")
    }

    #[tokio::test]
    async fn metadata_round_trips_with_store_assigned_created() {
        let store = memory_store().await;
        let id = id("b1", "obj1");
        let mut metadata = BTreeMap::new();
        metadata.insert("content-type".to_string(), "text/plain".to_string());

        assert!(!store.object_exists(&id).await.unwrap());
        store.put_object_meta(&id, 42, &metadata).await.unwrap();
        assert!(store.object_exists(&id).await.unwrap());

        let meta = store.get_object_meta(&id).await.unwrap();
        assert_eq!(meta.bucket, "b1");
        assert_eq!(meta.name, "obj1");
        assert_eq!(meta.content_length, 42);
        assert_eq!(meta.content_type(), Some("text/plain"));
        let age = chrono::Utc::now() - meta.created;
        assert!(age.num_seconds().abs() < 60);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = memory_store().await;
        let id = id("b1", "nope");

        assert!(matches!(
            store.get_object_meta(&id).await,
            Err(StoreError::ObjectNotFound(_))
        ));
        assert!(matches!(
            store.get_chunk(&id, 0).await,
            Err(StoreError::ChunkNotFound { num: 0, .. })
        ));
    }

    #[tokio::test]
    async fn metadata_row_is_never_overwritten() {
        let store = memory_store().await;
        let id = id("b1", "obj1");
        store.put_object_meta(&id, 1, &BTreeMap::new()).await.unwrap();

        let err = store
            .put_object_meta(&id, 2, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectExists(_)));
        assert_eq!(store.get_object_meta(&id).await.unwrap().content_length, 1);
    }

    #[tokio::test]
    async fn chunks_are_keyed_by_index() {
        let store = memory_store().await;
        let id = id("b1", "a/b/c");
        store.put_chunk(&id, 0, b"hello ").await.unwrap();
        store.put_chunk(&id, 1, b"world").await.unwrap();

        assert_eq!(&store.get_chunk(&id, 0).await.unwrap()[..], b"hello ");
        assert_eq!(&store.get_chunk(&id, 1).await.unwrap()[..], b"world");
        assert!(matches!(
            store.put_chunk(&id, 1, b"again").await,
            Err(StoreError::ChunkExists { num: 1, .. })
        ));
    }

    #[tokio::test]
    async fn empty_chunk_is_skipped() {
        let store = memory_store().await;
        let id = id("b1", "obj1");
        store.put_chunk(&id, 0, b"").await.unwrap();
        assert!(matches!(
            store.get_chunk(&id, 0).await,
            Err(StoreError::ChunkNotFound { num: 0, .. })
        ));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn connect_opens_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            database_url: format!("sqlite://{}", dir.path().join("objectdb.db").display()),
            max_connections: 2,
            consistency: Consistency::Full,
        };
        let store = SqliteObjectStore::connect(&cfg).await.unwrap();
        store.migrate().await.unwrap();
        // Schema creation is idempotent.
        store.migrate().await.unwrap();
        store.ping().await.unwrap();

        let id = id("b1", "obj1");
        store.put_object_meta(&id, 0, &BTreeMap::new()).await.unwrap();
        assert!(store.object_exists(&id).await.unwrap());
        store.close().await;
    }
}
