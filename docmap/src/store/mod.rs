//! The document store boundary consumed by the mapping engines, and an
//! embedded SQLite implementation of it.

mod apply;
pub mod query;
mod sqlite;

pub use apply::apply_update;
pub use sqlite::SqliteStore;

use crate::document::{Document, Value};
use crate::error::Result;
use async_trait::async_trait;

/// Options for `DocumentStore::find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub limit: Option<usize>,
}

/// Options for `DocumentStore::find_one_and_update`.
#[derive(Debug, Clone, Default)]
pub struct FindOneAndUpdateOptions {
    /// Predicates for `$[ident]` placeholders, one document per filter.
    pub array_filters: Vec<Document>,
    /// Return the document after the update instead of before it.
    pub return_new: bool,
}

/// A rewindable sequence of query results.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    rows: Vec<Document>,
    position: usize,
}

impl Cursor {
    pub fn new(rows: Vec<Document>) -> Self {
        Cursor { rows, position: 0 }
    }

    /// Move back to the first row.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// All rows, regardless of the current position.
    pub fn rows(&self) -> &[Document] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Document> {
        self.rows
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        row
    }
}

/// Operations the mapping engines need from a document store. Collections
/// are addressed by name; queries and update payloads are opaque documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, query: &Document, options: &FindOptions) -> Result<Cursor>;

    async fn find_one(&self, collection: &str, query: &Document) -> Result<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..FindOptions::default()
        };
        Ok(self.find(collection, query, &options).await?.next())
    }

    /// Insert a document, returning its identifier.
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Value>;

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Value>> {
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            ids.push(self.insert_one(collection, doc).await?);
        }
        Ok(ids)
    }

    /// Atomically apply `update` to the first document matching `filter`.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> Result<Option<Document>>;

    /// Replace the first document matching `filter`, returning the original.
    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: &Document,
        replacement: Document,
    ) -> Result<Option<Document>>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn create_collection(&self, name: &str, validator: &Document) -> Result<()>;

    async fn modify_collection(&self, name: &str, validator: &Document) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_rewind() {
        let mut row = Document::new();
        row.insert("n".into(), Value::Int(1));
        let mut cursor = Cursor::new(vec![row.clone(), row]);

        assert_eq!(cursor.by_ref().count(), 2);
        assert!(cursor.next().is_none());
        cursor.rewind();
        assert_eq!(cursor.count(), 2);
    }
}
