//! Database abstraction over SQLite via sqlx.
//!
//! A process-wide handle with an explicit open / close lifecycle. Records
//! go in and out as serde types; the store itself only understands the
//! primary-key field and the declared index fields.

use std::{collections::HashMap, path::Path, str::FromStr, sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::{
    error::StoreError,
    schema::{check_identifier, field_expr, CollectionSchema},
};

/// Bound value for an index range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Int(i64),
    Text(String),
}

/// Central store handle. Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    collections: Arc<RwLock<HashMap<String, CollectionSchema>>>,
}

impl Database {
    /// Open (or create) the SQLite database at `db_path`.
    ///
    /// WAL journal mode is configured at connection time, not inside a
    /// transaction, because SQLite forbids changing `journal_mode` there.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(StoreError::storage("open"))?;
        info!("[store] opened database at {}", db_path.display());
        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every SQLite in-memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::storage("open"))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(StoreError::storage("open"))?;
        debug!("[store] opened in-memory database");
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Declare collections. Idempotent: existing tables and indices are kept.
    pub async fn initialize(&self, schemas: &[CollectionSchema]) -> Result<(), StoreError> {
        self.ensure_open()?;
        for schema in schemas {
            schema.validate()?;
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::storage("initialize"))?;
        for schema in schemas {
            for statement in schema.create_statements() {
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(StoreError::storage("initialize"))?;
            }
        }
        tx.commit().await.map_err(StoreError::storage("initialize"))?;

        let mut collections = self.collections.write();
        for schema in schemas {
            debug!("[store] collection ready: {}", schema.name);
            collections.insert(schema.name.clone(), schema.clone());
        }
        Ok(())
    }

    /// Insert a new document. Fails with `DuplicateKey` if its primary key
    /// is taken; the constraint check and the write are one statement.
    pub async fn insert<T>(&self, collection: &str, doc: &T) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        let schema = self.schema(collection)?;
        let (key, json) = encode(&schema, doc)?;
        let sql = format!(
            "INSERT INTO {} (pk, doc) VALUES (?, ?) RETURNING doc",
            schema.table()
        );

        let stored: String = sqlx::query_scalar(&sql)
            .bind(&key)
            .bind(&json)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::DuplicateKey { key: key.clone() }
                }
                other => StoreError::storage("insert")(other),
            })?;
        Ok(serde_json::from_str(&stored)?)
    }

    /// Insert or overwrite a document.
    pub async fn put<T: Serialize>(&self, collection: &str, doc: &T) -> Result<(), StoreError> {
        let schema = self.schema(collection)?;
        let (key, json) = encode(&schema, doc)?;
        let sql = format!(
            "INSERT INTO {} (pk, doc) VALUES (?, ?) ON CONFLICT(pk) DO UPDATE SET doc = excluded.doc",
            schema.table()
        );
        sqlx::query(&sql)
            .bind(&key)
            .bind(&json)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage("put"))?;
        Ok(())
    }

    /// Overwrite an existing document, keeping the stored values of the
    /// `preserve` fields (top-level scalars). Returns `None` when no document
    /// has that primary key.
    pub async fn replace<T>(
        &self,
        collection: &str,
        doc: &T,
        preserve: &[&str],
    ) -> Result<Option<T>, StoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        let schema = self.schema(collection)?;
        let (key, json) = encode(&schema, doc)?;

        let mut new_doc = String::from("json(?)");
        if !preserve.is_empty() {
            let mut args = vec!["?".to_string()];
            for field in preserve {
                check_identifier("preserved field", field)?;
                args.push(format!("'$.{field}'"));
                args.push(field_expr(field));
            }
            new_doc = format!("json_set({})", args.join(", "));
        }
        let sql = format!(
            "UPDATE {} SET doc = {new_doc} WHERE pk = ? RETURNING doc",
            schema.table()
        );

        let stored: Option<String> = sqlx::query_scalar(&sql)
            .bind(&json)
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::storage("replace"))?;
        stored.map(|s| serde_json::from_str(&s)).transpose().map_err(StoreError::from)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let schema = self.schema(collection)?;
        let sql = format!("SELECT doc FROM {} WHERE pk = ?", schema.table());
        let stored: Option<String> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::storage("get"))?;
        stored.map(|s| serde_json::from_str(&s)).transpose().map_err(StoreError::from)
    }

    /// Returns true if a document was removed.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        let schema = self.schema(collection)?;
        let sql = format!("DELETE FROM {} WHERE pk = ?", schema.table());
        let result = sqlx::query(&sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage("delete"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn exists(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        let schema = self.schema(collection)?;
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE pk = ?)", schema.table());
        let found: i64 = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::storage("exists"))?;
        Ok(found != 0)
    }

    /// Documents whose indexed field lies in `[lower, upper]` (either bound
    /// optional), ordered by that field.
    pub async fn range<T: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
        lower: Option<IndexValue>,
        upper: Option<IndexValue>,
    ) -> Result<Vec<T>, StoreError> {
        let schema = self.schema(collection)?;
        let index = schema
            .index(index)
            .ok_or_else(|| StoreError::Schema(format!("unknown index {collection}.{index}")))?;
        let expr = field_expr(&index.field);

        let mut sql = format!("SELECT doc FROM {} WHERE {expr} IS NOT NULL", schema.table());
        if lower.is_some() {
            sql.push_str(&format!(" AND {expr} >= ?"));
        }
        if upper.is_some() {
            sql.push_str(&format!(" AND {expr} <= ?"));
        }
        sql.push_str(&format!(" ORDER BY {expr}, pk"));

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for bound in [lower, upper].into_iter().flatten() {
            query = match bound {
                IndexValue::Int(v) => query.bind(v),
                IndexValue::Text(v) => query.bind(v),
            };
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::storage("range"))?;
        rows.iter()
            .map(|s| serde_json::from_str(s).map_err(StoreError::from))
            .collect()
    }

    /// Close all connections. Safe to call more than once.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        self.pool.close().await;
        info!("[store] database closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn schema(&self, collection: &str) -> Result<CollectionSchema, StoreError> {
        self.ensure_open()?;
        self.collections
            .read()
            .get(collection)
            .cloned()
            .ok_or_else(|| StoreError::Schema(format!("collection not initialised: {collection}")))
    }
}

/// Serialise `doc` and pull out its primary key.
fn encode<T: Serialize>(schema: &CollectionSchema, doc: &T) -> Result<(String, String), StoreError> {
    let value = serde_json::to_value(doc)?;
    let key = value
        .get(&schema.primary_key)
        .and_then(serde_json::Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            StoreError::Validation(format!(
                "document is missing primary key field `{}`",
                schema.primary_key
            ))
        })?
        .to_string();
    Ok((key, serde_json::to_string(&value)?))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        rank: i64,
        body: String,
    }

    fn note(id: &str, rank: i64, body: &str) -> Note {
        Note {
            id: id.into(),
            rank,
            body: body.into(),
        }
    }

    async fn notes_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.initialize(&[CollectionSchema::new("notes", "id").with_index("by_rank", "rank")])
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn insert_get_delete() {
        let db = notes_db().await;
        let stored = db.insert("notes", &note("a", 1, "hello")).await.unwrap();
        assert_eq!(stored, note("a", 1, "hello"));
        assert!(db.exists("notes", "a").await.unwrap());

        let loaded: Option<Note> = db.get("notes", "a").await.unwrap();
        assert_eq!(loaded, Some(note("a", 1, "hello")));

        assert!(db.delete("notes", "a").await.unwrap());
        assert!(!db.delete("notes", "a").await.unwrap());
        assert!(!db.exists("notes", "a").await.unwrap());
    }

    #[tokio::test]
    async fn insert_duplicate_fails() {
        let db = notes_db().await;
        db.insert("notes", &note("a", 1, "first")).await.unwrap();
        let err = db.insert("notes", &note("a", 2, "second")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref key } if key == "a"));

        let loaded: Option<Note> = db.get("notes", "a").await.unwrap();
        assert_eq!(loaded.unwrap().body, "first");
    }

    #[tokio::test]
    async fn put_overwrites() {
        let db = notes_db().await;
        db.put("notes", &note("a", 1, "v1")).await.unwrap();
        db.put("notes", &note("a", 1, "v2")).await.unwrap();
        let loaded: Option<Note> = db.get("notes", "a").await.unwrap();
        assert_eq!(loaded.unwrap().body, "v2");
    }

    #[tokio::test]
    async fn replace_preserves_fields() {
        let db = notes_db().await;
        assert!(db
            .replace("notes", &note("a", 1, "x"), &["rank"])
            .await
            .unwrap()
            .is_none());

        db.insert("notes", &note("a", 7, "old")).await.unwrap();
        let replaced = db
            .replace("notes", &note("a", 99, "new"), &["rank"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced, note("a", 7, "new"));
    }

    #[tokio::test]
    async fn range_uses_index_order() {
        let db = notes_db().await;
        for (id, rank) in [("c", 30), ("a", 10), ("b", 20), ("d", 40)] {
            db.insert("notes", &note(id, rank, "")).await.unwrap();
        }
        let mid: Vec<Note> = db
            .range("notes", "by_rank", Some(IndexValue::Int(15)), Some(IndexValue::Int(35)))
            .await
            .unwrap();
        let ids: Vec<_> = mid.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);

        let all: Vec<Note> = db.range("notes", "by_rank", None, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, "a");

        assert!(matches!(
            db.range::<Note>("notes", "by_body", None, None).await,
            Err(StoreError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn missing_primary_key_is_validation_error() {
        let db = notes_db().await;
        let err = db.insert("notes", &note("", 1, "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn undeclared_collection_is_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let err = db.get::<Note>("notes", "a").await.unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let db = notes_db().await;
        db.insert("notes", &note("a", 1, "kept")).await.unwrap();
        db.initialize(&[CollectionSchema::new("notes", "id").with_index("by_rank", "rank")])
            .await
            .unwrap();
        assert!(db.exists("notes", "a").await.unwrap());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let db = notes_db().await;
        db.close().await;
        db.close().await;
        assert!(db.is_closed());
        assert!(matches!(
            db.get::<Note>("notes", "a").await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let schema = [CollectionSchema::new("notes", "id")];

        let db = Database::open(&path).await.unwrap();
        db.initialize(&schema).await.unwrap();
        db.insert("notes", &note("a", 1, "durable")).await.unwrap();
        db.close().await;

        let db = Database::open(&path).await.unwrap();
        db.initialize(&schema).await.unwrap();
        let loaded: Option<Note> = db.get("notes", "a").await.unwrap();
        assert_eq!(loaded.unwrap().body, "durable");
        db.close().await;
    }
}
