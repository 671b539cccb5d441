//! Helpers shared by the unit tests.

use crate::document::{from_json_object, Document, Value};
use crate::error::{Error, Result};
use crate::store::{Cursor, DocumentStore, FindOneAndUpdateOptions, FindOptions, SqliteStore};
use async_trait::async_trait;
use std::sync::Mutex;

/// Build a document from a JSON object literal.
pub(crate) fn doc(json: serde_json::Value) -> Document {
    from_json_object(json).expect("test document must be a JSON object")
}

/// An in-memory store that records every call made through it and can be
/// told to fail particular operations.
pub(crate) struct RecordingStore {
    inner: SqliteStore,
    calls: Mutex<Vec<String>>,
    fail_operator: Option<&'static str>,
    fail_replace: bool,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        RecordingStore {
            inner: SqliteStore::open_in_memory().expect("in-memory store"),
            calls: Mutex::new(Vec::new()),
            fail_operator: None,
            fail_replace: false,
        }
    }

    /// Fail every update whose payload carries `operator`.
    pub(crate) fn failing_on(mut self, operator: &'static str) -> Self {
        self.fail_operator = Some(operator);
        self
    }

    pub(crate) fn failing_replace(mut self) -> Self {
        self.fail_replace = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn find(&self, collection: &str, query: &Document, options: &FindOptions) -> Result<Cursor> {
        self.record(format!("find:{collection}"));
        self.inner.find(collection, query, options).await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Value> {
        self.record(format!("insert:{collection}"));
        self.inner.insert_one(collection, doc).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> Result<Option<Document>> {
        let operators: Vec<&str> = update.keys().map(String::as_str).collect();
        self.record(format!("update:{collection}:{}", operators.join(",")));
        if let Some(op) = self.fail_operator {
            if update.contains_key(op) {
                return Err(Error::Store("injected failure".to_string()));
            }
        }
        self.inner.find_one_and_update(collection, filter, update, options).await
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: &Document,
        replacement: Document,
    ) -> Result<Option<Document>> {
        self.record(format!("replace:{collection}"));
        if self.fail_replace {
            return Err(Error::Store("injected replace failure".to_string()));
        }
        self.inner.find_one_and_replace(collection, filter, replacement).await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn create_collection(&self, name: &str, validator: &Document) -> Result<()> {
        self.record(format!("create:{name}"));
        self.inner.create_collection(name, validator).await
    }

    async fn modify_collection(&self, name: &str, validator: &Document) -> Result<()> {
        self.record(format!("modify:{name}"));
        self.inner.modify_collection(name, validator).await
    }
}
