//! The per-model facade: binds one schema model to its collection on a
//! store and runs documents through the engines on the way in and out.

use crate::document::{Document, Value, ID_FIELD};
use crate::error::{Error, Result, UpdateFailure};
use crate::join::{widen_projection, JoinSpec, ReferenceResolver};
use crate::schema::{ModelDefinition, SchemaDefinition};
use crate::store::{self, Cursor, DocumentStore, FindOneAndUpdateOptions};
use crate::transform::{coerce, Transformer};
use crate::update::{compile, ActionKind, CompiledUpdate};
use crate::validation::{check_document, json_schema};

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Restore the pre-update document if any action fails.
    pub revert_on_error: bool,
}

/// Result of a successful `update_one`.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// The document after the last action ran.
    pub value: Option<Document>,
    /// Raw result of every action, in execution order.
    pub results: Vec<(ActionKind, Option<Document>)>,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub join: Vec<JoinSpec>,
    pub projection: Option<Document>,
    pub limit: Option<usize>,
    /// Return a cursor instead of materialized rows.
    pub cursor: bool,
}

#[derive(Debug, Clone)]
pub enum FindOutput {
    Rows(Vec<Document>),
    Cursor(Cursor),
}

impl FindOutput {
    pub fn into_rows(self) -> Vec<Document> {
        match self {
            FindOutput::Rows(rows) => rows,
            FindOutput::Cursor(cursor) => cursor.into_rows(),
        }
    }
}

pub struct Model<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    schema: &'a SchemaDefinition,
    definition: &'a ModelDefinition,
}

impl<'a, S: DocumentStore + ?Sized> Model<'a, S> {
    pub fn new(store: &'a S, schema: &'a SchemaDefinition, name: &str) -> Result<Self> {
        Ok(Model {
            store,
            schema,
            definition: schema.model(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn collection(&self) -> &str {
        self.definition.collection_name()
    }

    pub fn definition(&self) -> &ModelDefinition {
        self.definition
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Transform and validate a new document, then insert it. Returns the
    /// identifier.
    pub async fn insert_one(&self, mut doc: Document) -> Result<Value> {
        self.prepare(&mut doc)?;
        self.store.insert_one(self.collection(), doc).await
    }

    pub async fn insert_many(&self, mut docs: Vec<Document>) -> Result<Vec<Value>> {
        for doc in docs.iter_mut() {
            self.prepare(doc)?;
        }
        self.store.insert_many(self.collection(), docs).await
    }

    fn prepare(&self, doc: &mut Document) -> Result<()> {
        Transformer::insert().transform_document(doc, self.definition)?;
        check_document(self.definition, doc)?;
        Ok(())
    }

    /// Compile a partial update without executing it.
    pub fn compile_update(&self, update: &Document) -> Result<CompiledUpdate> {
        compile(update, self.definition, &Transformer::update())
    }

    /// Apply a partial update to the document identified by its `_id`.
    ///
    /// Actions run in the order assign, append, remove, each as its own
    /// atomic update; the update as a whole is atomic only when it compiles
    /// to a single action. Every action is attempted even after a failure,
    /// and all failures are reported together.
    pub async fn update_one(&self, update: Document, options: UpdateOptions) -> Result<UpdateOutcome> {
        let id = update
            .get(ID_FIELD)
            .filter(|id| !id.is_null())
            .ok_or_else(|| Error::MissingId {
                collection: self.collection().to_string(),
            })?;
        let id = coerce::to_reference(id).unwrap_or_else(|| id.clone());
        let compiled = self.compile_update(&update)?;

        let mut filter = Document::new();
        filter.insert(ID_FIELD.to_string(), id);

        let snapshot = if options.revert_on_error {
            self.store.find_one(self.collection(), &filter).await?
        } else {
            None
        };

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for action in compiled.actions() {
            let store_options = FindOneAndUpdateOptions {
                array_filters: action.filter_documents(),
                return_new: true,
            };
            match self
                .store
                .find_one_and_update(self.collection(), &filter, &action.to_payload(), &store_options)
                .await
            {
                Ok(result) => results.push((action.kind, result)),
                Err(e) => {
                    log::warn!("{} on '{}' failed: {e}", action.kind.operator(), self.collection());
                    errors.push((action.kind, e));
                }
            }
        }

        if errors.is_empty() {
            let value = results.last().and_then(|(_, doc)| doc.clone());
            return Ok(UpdateOutcome { value, results });
        }

        let revert_error = match snapshot {
            Some(snapshot) => self
                .store
                .find_one_and_replace(self.collection(), &filter, snapshot)
                .await
                .err(),
            None => None,
        };
        if let Some(e) = &revert_error {
            log::warn!("Revert on '{}' failed: {e}", self.collection());
        }

        Err(Error::UpdateFailed(Box::new(UpdateFailure {
            errors,
            results,
            revert_error,
        })))
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn find(&self, query: Document, options: FindOptions) -> Result<FindOutput> {
        let FindOptions {
            mut join,
            projection,
            limit,
            cursor,
        } = options;
        let resolver = ReferenceResolver::new(self.store, self.schema);

        let query = resolver.build_join_query(self.definition, query, &mut join).await?;
        let store_options = store::FindOptions {
            projection: projection
                .as_ref()
                .map(|p| widen_projection(p, join.iter().flat_map(|j| &j.on))),
            limit,
        };
        let found = self.store.find(self.collection(), &query, &store_options).await?;

        if join.is_empty() {
            return Ok(if cursor {
                FindOutput::Cursor(found)
            } else {
                FindOutput::Rows(found.into_rows())
            });
        }

        let mut rows = found.into_rows();
        resolver.attach_references(&mut rows, &mut join, self.definition).await?;
        Ok(if cursor {
            FindOutput::Cursor(Cursor::new(rows))
        } else {
            FindOutput::Rows(rows)
        })
    }

    pub async fn find_one(&self, query: Document, join: Vec<JoinSpec>) -> Result<Option<Document>> {
        let options = FindOptions {
            join,
            limit: Some(1),
            ..FindOptions::default()
        };
        Ok(self.find(query, options).await?.into_rows().into_iter().next())
    }

    /// Resolve joins in rows that were fetched some other way.
    pub async fn attach_references(&self, rows: &mut [Document], joins: &mut [JoinSpec]) -> Result<()> {
        ReferenceResolver::new(self.store, self.schema)
            .attach_references(rows, joins, self.definition)
            .await
    }

    // ── Collection ───────────────────────────────────────────────────

    pub fn validator(&self) -> Document {
        json_schema(self.definition)
    }

    /// Install the validator, creating the collection if it does not exist.
    pub async fn sync_collection(&self) -> Result<()> {
        let validator = self.validator();
        let existing = self.store.list_collections().await?;
        if existing.iter().any(|name| name == self.collection()) {
            self.store.modify_collection(self.collection(), &validator).await
        } else {
            log::info!("Creating collection '{}'", self.collection());
            self.store.create_collection(self.collection(), &validator).await
        }
    }
}
