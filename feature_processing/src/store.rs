//! Append-only persistence of feature vectors, partitioned by collection.

use async_trait::async_trait;
use data_ingestion::config::StoreConfig;
use log::info;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::StoreError;
use crate::misc::{Document, FeatureVector, RecordId, StoredRecord};

pub const IN_MEMORY: &str = ":memory:";

#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Appends `vector` to `collection`. Never overwrites.
    async fn insert(&self, collection: &str, vector: &FeatureVector) -> Result<RecordId, StoreError>;

    /// The record of `collection` with the greatest insertion id.
    async fn latest(&self, collection: &str) -> Result<Option<StoredRecord>, StoreError>;
}

/// Opens the store named by the configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn FeatureStore>, StoreError> {
    if config.path == IN_MEMORY {
        info!("Using in-memory feature store");
        return Ok(Arc::new(MemoryStore::default()));
    }
    let store = SqliteStore::open(&config.path)?;
    info!("Connected to feature store: {}", config.path);
    Ok(Arc::new(store))
}

/// Process-local store. Ids are assigned under the write lock so they follow append order.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    last_id: RecordId,
    collections: HashMap<String, Vec<StoredRecord>>,
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn insert(&self, collection: &str, vector: &FeatureVector) -> Result<RecordId, StoreError> {
        let mut inner = self.inner.write();
        inner.last_id += 1;
        let id = inner.last_id;

        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredRecord {
                id,
                document: vector.to_document(),
            });
        Ok(id)
    }

    async fn latest(&self, collection: &str) -> Result<Option<StoredRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .collections
            .get(collection)
            .and_then(|records| records.last())
            .cloned())
    }
}

/// SQLite-backed store. Each record keeps its document as JSON text.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::Open)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Open)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn).map_err(StoreError::Open)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feature_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            document TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_feature_records_collection
            ON feature_records(collection, id)",
        [],
    )?;
    Ok(())
}

#[async_trait]
impl FeatureStore for SqliteStore {
    async fn insert(&self, collection: &str, vector: &FeatureVector) -> Result<RecordId, StoreError> {
        let document = serde_json::to_string(&vector.to_document())?;
        let collection = collection.to_string();
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO feature_records (collection, document) VALUES (?1, ?2)",
                params![collection, document],
            )?;
            Ok::<_, StoreError>(conn.last_insert_rowid() as RecordId)
        })
        .await?
    }

    async fn latest(&self, collection: &str) -> Result<Option<StoredRecord>, StoreError> {
        let collection = collection.to_string();
        let conn = Arc::clone(&self.conn);

        let row = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.query_row(
                "SELECT id, document FROM feature_records
                 WHERE collection = ?1 ORDER BY id DESC LIMIT 1",
                params![collection],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
        })
        .await??;

        row.map(|(id, text)| {
            let document: Document = serde_json::from_str(&text)?;
            Ok::<_, StoreError>(StoredRecord {
                id: id as RecordId,
                document,
            })
        })
        .transpose()
    }
}
