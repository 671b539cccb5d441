use super::apply::apply_update;
use super::query::{matches, project};
use super::{Cursor, DocumentStore, FindOneAndUpdateOptions, FindOptions};
use crate::document::{from_json_object, to_json_object, Document, ObjectId, Value, ID_FIELD};
use crate::error::{Error, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A document store kept in a single SQLite database. Documents are stored
/// as extended JSON, one row per document.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("SQLite connection lock poisoned".to_string()))
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                UNIQUE (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                validator_json TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    // ── Document Rows ────────────────────────────────────────────────

    fn load_documents(conn: &Connection, collection: &str) -> Result<Vec<StoredDocument>> {
        let mut stmt = conn.prepare(
            "SELECT id, data_json FROM documents WHERE collection = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (key, data_json) = row?;
            docs.push(StoredDocument {
                key,
                data: parse_data(&data_json)?,
            });
        }
        Ok(docs)
    }

    fn first_match(conn: &Connection, collection: &str, filter: &Document) -> Result<Option<StoredDocument>> {
        Ok(Self::load_documents(conn, collection)?
            .into_iter()
            .find(|stored| matches(&stored.data, filter)))
    }

    fn write_document(conn: &Connection, collection: &str, key: &str, data: &Document) -> Result<()> {
        let data_json = serde_json::to_string(&to_json_object(data))?;
        conn.execute(
            "UPDATE documents SET data_json = ?3 WHERE collection = ?1 AND id = ?2",
            params![collection, key, data_json],
        )?;
        Ok(())
    }
}

/// A stored row: the identifier key and the parsed document.
struct StoredDocument {
    key: String,
    data: Document,
}

fn parse_data(data_json: &str) -> Result<Document> {
    let json: serde_json::Value = serde_json::from_str(data_json)?;
    from_json_object(json)
        .ok_or_else(|| Error::Store("Stored document is not a JSON object".to_string()))
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find(&self, collection: &str, query: &Document, options: &FindOptions) -> Result<Cursor> {
        let conn = self.conn()?;
        let mut rows = Vec::new();
        for stored in Self::load_documents(&conn, collection)? {
            if options.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            if matches(&stored.data, query) {
                rows.push(match &options.projection {
                    Some(projection) => project(&stored.data, projection),
                    None => stored.data,
                });
            }
        }
        log::debug!("find on '{collection}' returned {} rows", rows.len());
        Ok(Cursor::new(rows))
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> Result<Value> {
        let id = match doc.get(ID_FIELD) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                let id = Value::Id(ObjectId::new());
                doc.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        let key = id
            .id_key()
            .ok_or_else(|| Error::Store(format!("Unsupported _id of type {}", id.type_name())))?;

        let conn = self.conn()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(Error::Store(format!(
                "Duplicate _id '{key}' in collection '{collection}'"
            )));
        }

        let data_json = serde_json::to_string(&to_json_object(&doc))?;
        conn.execute(
            "INSERT INTO documents (collection, id, data_json) VALUES (?1, ?2, ?3)",
            params![collection, key, data_json],
        )?;
        Ok(id)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let Some(stored) = Self::first_match(&conn, collection, filter)? else {
            return Ok(None);
        };

        let mut updated = stored.data.clone();
        apply_update(&mut updated, update, &options.array_filters)?;
        Self::write_document(&conn, collection, &stored.key, &updated)?;

        Ok(Some(if options.return_new { updated } else { stored.data }))
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: &Document,
        mut replacement: Document,
    ) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let Some(stored) = Self::first_match(&conn, collection, filter)? else {
            return Ok(None);
        };

        if let Some(id) = stored.data.get(ID_FIELD) {
            replacement.insert(ID_FIELD.to_string(), id.clone());
        }
        Self::write_document(&conn, collection, &stored.key, &replacement)?;
        Ok(Some(stored.data))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM collections UNION SELECT DISTINCT collection FROM documents ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    async fn create_collection(&self, name: &str, validator: &Document) -> Result<()> {
        let conn = self.conn()?;
        let validator_json = serde_json::to_string(&to_json_object(validator))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO collections (name, validator_json) VALUES (?1, ?2)",
            params![name, validator_json],
        )?;
        if inserted == 0 {
            return Err(Error::Store(format!("Collection '{name}' already exists")));
        }
        Ok(())
    }

    async fn modify_collection(&self, name: &str, validator: &Document) -> Result<()> {
        let conn = self.conn()?;
        let validator_json = serde_json::to_string(&to_json_object(validator))?;
        conn.execute(
            "INSERT OR REPLACE INTO collections (name, validator_json) VALUES (?1, ?2)",
            params![name, validator_json],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    /// The validator installed on a collection, if any.
    pub fn validator(&self, name: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT validator_json FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        json.as_deref().map(parse_data).transpose()
    }
}
