//! SQLite-backed document store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Documents are stored as JSON text; the autoincrementing `seq` column
//! gives every collection a stable insertion order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{Document, DocumentStore, Fields};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Document store backed by a single SQLite database file.
pub struct SqliteDocumentStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables if they do not already exist.
    /// Idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                collection  TEXT NOT NULL,
                id          TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection
                ON documents(collection, seq);
            ",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, now_rfc3339()],
        )?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn parse_body(id: String, body: &str) -> anyhow::Result<Document> {
    let fields: Fields = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("Corrupt document body for {id}: {e}"))?;
    Ok(Document { id, fields })
}

impl DocumentStore for SqliteDocumentStore {
    fn append(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let id = uuid::Uuid::new_v4().simple().to_string();
            let body = serde_json::to_string(&fields)?;
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO documents (collection, id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![collection, id, body, now_rfc3339()],
            )?;
            Ok(id)
        })
    }

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Document>>> + Send + '_>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| parse_body(id, &b)).transpose()
        })
    }

    fn list(
        &self,
        collection: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Document>>> + Send + '_>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, body FROM documents WHERE collection = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut docs = Vec::new();
            for row in rows {
                let (id, body) = row?;
                docs.push(parse_body(id, &body)?);
            }
            Ok(docs)
        })
    }

    fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            Ok(())
        })
    }

    fn put(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let body = serde_json::to_string(&fields)?;
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO documents (collection, id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
                params![collection, id, body, now_rfc3339()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(":memory:").unwrap()
    }

    fn record(path: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("path".to_string(), json!(path));
        f.insert("thumbnail".to_string(), json!(format!("{path}-thumb")));
        f
    }

    #[tokio::test]
    async fn test_append_and_list_in_order() {
        let store = store();
        let first = store.append("images", record("a")).await.unwrap();
        let second = store.append("images", record("b")).await.unwrap();
        store.append("other", record("z")).await.unwrap();

        let docs = store.list("images").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, first);
        assert_eq!(docs[1].id, second);
        assert_eq!(docs[1].str_field("thumbnail"), Some("b-thumb"));
    }

    #[tokio::test]
    async fn test_duplicate_records_allowed() {
        let store = store();
        store.append("images", record("a")).await.unwrap();
        store.append("images", record("a")).await.unwrap();
        assert_eq!(store.list("images").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_put_replaces_and_keeps_position() {
        let store = store();
        store.put("InfoDevice", "d1", record("x")).await.unwrap();
        store.put("InfoDevice", "d2", record("y")).await.unwrap();
        store.put("InfoDevice", "d1", record("w")).await.unwrap();

        let docs = store.list("InfoDevice").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "d1");
        assert_eq!(docs[0].str_field("path"), Some("w"));
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let store = store();
        store.put("ProfileAssociated", "p1", record("x")).await.unwrap();
        assert!(store.get("ProfileAssociated", "p1").await.unwrap().is_some());
        assert!(store.get("ProfileAssociated", "p2").await.unwrap().is_none());

        store.delete("ProfileAssociated", "p1").await.unwrap();
        store.delete("ProfileAssociated", "p1").await.unwrap();
        assert!(store.get("ProfileAssociated", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteDocumentStore::new(path).unwrap();
            store.append("images", record("a")).await.unwrap();
        }
        let store = SqliteDocumentStore::new(path).unwrap();
        assert_eq!(store.list("images").await.unwrap().len(), 1);
    }
}
