//! Reference resolution ("joins") over query results.
//!
//! A join names reference fields by their full dot path. Resolution runs in
//! passes over a result set: discovery records a pointer for every matching
//! reference slot, fetch issues one batched `$in` lookup per join against
//! the referenced collection, and attach writes the fetched rows into every
//! slot that pointed at them. Nested joins recurse on the fetched rows
//! before they are attached, to any depth.

mod pointer;

pub use pointer::{discover, PointerBuckets, ReferencePointer, Slot};

use crate::document::{Document, Value, ID_FIELD};
use crate::error::{Error, Result};
use crate::schema::{ModelDefinition, SchemaDefinition};
use crate::store::query::is_truthy_flag;
use crate::store::{Cursor, DocumentStore, FindOptions};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

/// A request to resolve one or more reference fields.
#[derive(Debug, Clone, Default)]
pub struct JoinSpec {
    /// Full dot paths of the reference fields to resolve.
    pub on: Vec<String>,
    pub projection: Option<Document>,
    /// Predicate on the referenced collection. At the top level it also
    /// restricts the outer query to rows referencing a match.
    pub filter: Option<Document>,
    pub joins: Vec<JoinSpec>,
    resolved_model: Option<String>,
    prefetched: Option<Cursor>,
}

impl JoinSpec {
    pub fn on<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        JoinSpec {
            on: paths.into_iter().map(Into::into).collect(),
            ..JoinSpec::default()
        }
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    /// Name of the referenced model, once the join has been resolved
    /// against a schema.
    pub fn resolved_model(&self) -> Option<&str> {
        self.resolved_model.as_deref()
    }

    /// Projection used to fetch referenced rows: the requested one, widened
    /// so nested joins can still see their reference fields.
    fn fetch_projection(&self) -> Option<Document> {
        let mut projection = widen_projection(self.projection.as_ref()?, self.joins.iter().flat_map(|j| &j.on));
        // rows are indexed by _id, so it is always fetched
        projection.remove(ID_FIELD);
        Some(projection)
    }

    fn hides_id(&self) -> bool {
        self.projection
            .as_ref()
            .and_then(|p| p.get(ID_FIELD))
            .map_or(false, |flag| !is_truthy_flag(flag))
    }
}

/// Widen `projection` so every path in `paths` is fetched: inclusive
/// projections gain the paths, exclusive ones lose exclusions covering them.
pub fn widen_projection<'p>(projection: &Document, paths: impl IntoIterator<Item = &'p String>) -> Document {
    let mut projection = projection.clone();
    let paths: Vec<&String> = paths.into_iter().collect();
    let inclusive = projection
        .iter()
        .any(|(key, flag)| key != ID_FIELD && is_truthy_flag(flag));

    if inclusive {
        for path in paths {
            projection.insert(path.clone(), Value::Int(1));
        }
    } else {
        projection.retain(|key, _| {
            !paths
                .iter()
                .any(|on| *on == key || on.starts_with(&format!("{key}.")))
        });
    }
    projection
}

type BoxFuture<'b, T> = Pin<Box<dyn Future<Output = T> + Send + 'b>>;

/// Resolves joins against a store using a schema registry.
pub struct ReferenceResolver<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    schema: &'a SchemaDefinition,
}

impl<'a, S: DocumentStore + ?Sized> ReferenceResolver<'a, S> {
    pub fn new(store: &'a S, schema: &'a SchemaDefinition) -> Self {
        ReferenceResolver { store, schema }
    }

    /// Shape the outer query for joins carrying filters: each such join
    /// queries its referenced collection, and the outer query is restricted
    /// to rows whose `on` field holds one of the matching identifiers. The
    /// matching rows are kept on the join and reused by the attach pass.
    pub async fn build_join_query(
        &self,
        model: &ModelDefinition,
        base_query: Document,
        joins: &mut [JoinSpec],
    ) -> Result<Document> {
        check_distinct_paths(joins)?;
        let mut clauses = Vec::new();

        for join in joins.iter_mut() {
            let target = self.resolve_target(model, join)?;
            let Some(filter) = &join.filter else {
                continue;
            };

            let options = FindOptions {
                projection: join.fetch_projection(),
                limit: None,
            };
            let cursor = self.store.find(target.collection_name(), filter, &options).await?;
            let ids: Vec<Value> = cursor
                .rows()
                .iter()
                .filter_map(|row| row.get(ID_FIELD).cloned())
                .collect();
            log::debug!(
                "join filter on '{}' matched {} rows",
                target.collection_name(),
                ids.len()
            );

            clauses.push(membership_clause(&join.on, ids));
            join.prefetched = Some(cursor);
        }

        if clauses.is_empty() {
            return Ok(base_query);
        }
        if !base_query.is_empty() {
            clauses.insert(0, Value::Object(base_query));
        }
        let mut query = Document::new();
        query.insert("$and".to_string(), Value::Array(clauses));
        Ok(query)
    }

    /// Resolve `joins` inside `rows` in place.
    pub async fn attach_references(
        &self,
        rows: &mut [Document],
        joins: &mut [JoinSpec],
        model: &ModelDefinition,
    ) -> Result<()> {
        self.attach(rows, joins, model).await
    }

    fn attach<'b>(
        &'b self,
        rows: &'b mut [Document],
        joins: &'b mut [JoinSpec],
        model: &'b ModelDefinition,
    ) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            if joins.is_empty() || rows.is_empty() {
                return Ok(());
            }

            check_distinct_paths(joins)?;
            let mut targets = Vec::with_capacity(joins.len());
            for join in joins.iter_mut() {
                targets.push(self.resolve_target(model, join)?);
            }

            let mut buckets = {
                let on_paths: HashSet<&str> = joins
                    .iter()
                    .flat_map(|j| j.on.iter().map(String::as_str))
                    .collect();
                discover(rows, &model.fields, &on_paths)?
            };

            for (join, target) in joins.iter_mut().zip(targets) {
                let pointers: Vec<ReferencePointer> = join
                    .on
                    .iter()
                    .filter_map(|path| buckets.remove(path))
                    .flatten()
                    .collect();
                if pointers.is_empty() {
                    continue;
                }

                let mut fetched = self.fetch(join, target, &pointers).await?;
                if !join.joins.is_empty() {
                    self.attach(&mut fetched, &mut join.joins, target).await?;
                }

                let hide_id = join.hides_id();
                let mut by_id: HashMap<String, Value> = HashMap::with_capacity(fetched.len());
                for mut row in fetched {
                    let Some(key) = row.get(ID_FIELD).and_then(Value::id_key) else {
                        continue;
                    };
                    if hide_id {
                        row.remove(ID_FIELD);
                    }
                    by_id.insert(key, Value::Object(row));
                }

                let mut attached = 0;
                for pointer in &pointers {
                    let Some(row) = pointer.id.id_key().and_then(|key| by_id.get(&key)) else {
                        continue;
                    };
                    if pointer.replace(rows, row.clone()) {
                        attached += 1;
                    }
                }
                log::debug!(
                    "attached {attached}/{} references from '{}'",
                    pointers.len(),
                    target.collection_name()
                );
            }

            Ok(())
        })
    }

    /// Rows for every identifier the pointers hold: the prefetched rows when
    /// the query-shaping pass left some, otherwise one `$in` lookup.
    async fn fetch(
        &self,
        join: &mut JoinSpec,
        target: &ModelDefinition,
        pointers: &[ReferencePointer],
    ) -> Result<Vec<Document>> {
        let mut seen = HashSet::new();
        let ids: Vec<Value> = pointers
            .iter()
            .filter(|p| p.id.id_key().map_or(false, |key| seen.insert(key)))
            .map(|p| p.id.clone())
            .collect();

        if let Some(mut cursor) = join.prefetched.take() {
            cursor.rewind();
            return Ok(cursor
                .filter(|row| {
                    row.get(ID_FIELD)
                        .and_then(Value::id_key)
                        .map_or(false, |key| seen.contains(&key))
                })
                .collect());
        }

        let mut query = membership_clause(&[ID_FIELD.to_string()], ids);
        if let Some(filter) = &join.filter {
            query = Value::Array(vec![query, Value::Object(filter.clone())]);
            query = Value::Object(Document::from([("$and".to_string(), query)]));
        }
        let Value::Object(query) = query else {
            return Err(Error::Other("join query must be a document".to_string()));
        };

        let options = FindOptions {
            projection: join.fetch_projection(),
            limit: None,
        };
        let rows = self
            .store
            .find(target.collection_name(), &query, &options)
            .await?
            .into_rows();
        log::debug!(
            "fetched {} of {} referenced rows from '{}'",
            rows.len(),
            seen.len(),
            target.collection_name()
        );
        Ok(rows)
    }

    /// Check every `on` path names a reference field of `model`, all of them
    /// pointing at the same model, and return that model.
    fn resolve_target(&self, model: &ModelDefinition, join: &mut JoinSpec) -> Result<&'a ModelDefinition> {
        if join.on.is_empty() {
            return Err(Error::Schema(format!(
                "Join on model '{}' names no reference paths",
                model.name
            )));
        }

        let mut target: Option<&str> = None;
        for path in &join.on {
            let field = model.field(path).filter(|f| f.is_reference()).ok_or_else(|| {
                Error::Schema(format!(
                    "Join path '{path}' is not a reference field of model '{}'",
                    model.name
                ))
            })?;
            let referenced = field.referenced_model()?;
            match target {
                None => target = Some(referenced),
                Some(existing) if existing != referenced => {
                    return Err(Error::Schema(format!(
                        "Join paths {:?} reference different models ('{existing}' and '{referenced}')",
                        join.on
                    )));
                }
                Some(_) => {}
            }
        }

        let target = self.schema.model(target.unwrap_or_default())?;
        join.resolved_model = Some(target.name.clone());
        Ok(target)
    }
}

/// Each reference path may be resolved by one join only.
fn check_distinct_paths(joins: &[JoinSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for path in joins.iter().flat_map(|j| j.on.iter()) {
        if !seen.insert(path.as_str()) {
            return Err(Error::Schema(format!(
                "Join path '{path}' is named by more than one join"
            )));
        }
    }
    Ok(())
}

/// `{ path: { $in: ids } }`, or an `$or` of those for several paths.
fn membership_clause(paths: &[String], ids: Vec<Value>) -> Value {
    let clause = |path: &String| {
        let mut condition = Document::new();
        condition.insert("$in".to_string(), Value::Array(ids.clone()));
        let mut clause = Document::new();
        clause.insert(path.clone(), Value::Object(condition));
        Value::Object(clause)
    };

    if paths.len() == 1 {
        return clause(&paths[0]);
    }
    let mut any = Document::new();
    any.insert("$or".to_string(), Value::Array(paths.iter().map(clause).collect()));
    Value::Object(any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ObjectId;
    use crate::schema::parse_schema_str;
    use crate::test_support::{doc, RecordingStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_schema() -> SchemaDefinition {
        parse_schema_str(
            r#"
models:
  orgs:
    fields:
      name: { type: string }
  users:
    fields:
      name: { type: string }
      org: { type: reference, model: orgs }
      best_friend: { type: reference, model: users }
  posts:
    fields:
      title: { type: string }
      author: { type: reference, model: users }
      reviewers: { type: reference, model: users, array: true }
      comments:
        type: nested
        array: true
        fields:
          text: { type: string }
          author: { type: reference, model: users }
"#,
        )
        .unwrap()
    }

    struct Fixture {
        store: RecordingStore,
        schema: SchemaDefinition,
        alice: ObjectId,
        bob: ObjectId,
    }

    async fn fixture() -> Fixture {
        let store = RecordingStore::new();
        let acme = ObjectId::new();
        let alice = ObjectId::new();
        let bob = ObjectId::new();
        store
            .insert_one("orgs", doc(json!({ "_id": { "$oid": acme.to_string() }, "name": "Acme" })))
            .await
            .unwrap();
        store
            .insert_one(
                "users",
                doc(json!({
                    "_id": { "$oid": alice.to_string() },
                    "name": "Alice",
                    "org": { "$oid": acme.to_string() },
                })),
            )
            .await
            .unwrap();
        store
            .insert_one(
                "users",
                doc(json!({
                    "_id": { "$oid": bob.to_string() },
                    "name": "Bob",
                    "best_friend": { "$oid": alice.to_string() },
                })),
            )
            .await
            .unwrap();
        store.clear_calls();
        Fixture {
            store,
            schema: test_schema(),
            alice,
            bob,
        }
    }

    fn name_of(value: &Value) -> Option<&str> {
        value.as_object()?.get("name")?.as_str()
    }

    #[tokio::test]
    async fn test_fan_out_with_single_fetch() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![
            doc(json!({ "title": "one", "author": { "$oid": f.alice.to_string() } })),
            doc(json!({ "title": "two", "author": { "$oid": f.alice.to_string() } })),
        ];
        let mut joins = vec![JoinSpec::on(["author"])];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        assert_eq!(name_of(&rows[0]["author"]), Some("Alice"));
        assert_eq!(rows[0]["author"], rows[1]["author"]);
        assert_eq!(f.store.count_calls("find:users"), 1);
        assert_eq!(joins[0].resolved_model(), Some("users"));
    }

    #[tokio::test]
    async fn test_exact_path_matching() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![doc(json!({
            "author": { "$oid": f.bob.to_string() },
            "comments": [{ "text": "hi", "author": { "$oid": f.alice.to_string() } }],
        }))];
        let mut joins = vec![JoinSpec::on(["comments.author"])];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        let comment = rows[0]["comments"].as_array().unwrap()[0].as_object().unwrap();
        assert_eq!(name_of(&comment["author"]), Some("Alice"));
        assert_eq!(rows[0]["author"], Value::Id(f.bob));
    }

    #[tokio::test]
    async fn test_array_of_references() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![doc(json!({
            "reviewers": [{ "$oid": f.alice.to_string() }, { "$oid": f.bob.to_string() }],
        }))];
        let mut joins = vec![JoinSpec::on(["reviewers"])];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        let reviewers: Vec<Option<&str>> = rows[0]["reviewers"].as_array().unwrap().iter().map(name_of).collect();
        assert_eq!(reviewers, vec![Some("Alice"), Some("Bob")]);
    }

    #[tokio::test]
    async fn test_nested_joins_resolve_recursively() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![doc(json!({ "author": { "$oid": f.bob.to_string() } }))];
        let mut joins = vec![JoinSpec::on(["author"]).with_join(
            JoinSpec::on(["best_friend"]).with_join(JoinSpec::on(["org"])),
        )];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        let author = rows[0]["author"].as_object().unwrap();
        let friend = author["best_friend"].as_object().unwrap();
        assert_eq!(name_of(&rows[0]["author"]), Some("Bob"));
        assert_eq!(friend["name"], Value::from("Alice"));
        assert_eq!(name_of(&friend["org"]), Some("Acme"));
        assert_eq!(f.store.count_calls("find:orgs"), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_keeps_placeholder() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let ghost = ObjectId::new();
        let mut rows = vec![
            doc(json!({ "author": { "_id": { "$oid": ghost.to_string() }, "name": "stale" } })),
            doc(json!({ "title": "no author" })),
        ];
        let mut joins = vec![JoinSpec::on(["author"])];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        assert_eq!(rows[0]["author"], Value::Object(doc(json!({ "_id": { "$oid": ghost.to_string() } }))));
        assert!(!rows[1].contains_key("author"));
    }

    #[tokio::test]
    async fn test_projection_keeps_nested_join_fields() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![doc(json!({ "author": { "$oid": f.alice.to_string() } }))];
        let mut joins = vec![JoinSpec::on(["author"])
            .with_projection(doc(json!({ "name": 1 })))
            .with_join(JoinSpec::on(["org"]))];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        let author = rows[0]["author"].as_object().unwrap();
        assert_eq!(author["name"], Value::from("Alice"));
        assert_eq!(name_of(&author["org"]), Some("Acme"));
    }

    #[tokio::test]
    async fn test_projection_can_hide_id() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![doc(json!({ "author": { "$oid": f.alice.to_string() } }))];
        let mut joins = vec![JoinSpec::on(["author"]).with_projection(doc(json!({ "_id": 0, "org": 0 })))];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        assert_eq!(rows[0]["author"], Value::Object(doc(json!({ "name": "Alice" }))));
    }

    #[tokio::test]
    async fn test_build_join_query_and_cached_rows() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let resolver = ReferenceResolver::new(&f.store, &f.schema);
        let mut joins = vec![JoinSpec::on(["author"]).with_filter(doc(json!({ "name": "Alice" })))];

        let query = resolver
            .build_join_query(model, doc(json!({ "title": "one" })), &mut joins)
            .await
            .unwrap();

        assert_eq!(
            query,
            doc(json!({ "$and": [
                { "title": "one" },
                { "author": { "$in": [{ "$oid": f.alice.to_string() }] } },
            ] }))
        );
        assert_eq!(f.store.count_calls("find:users"), 1);

        let mut rows = vec![doc(json!({ "title": "one", "author": { "$oid": f.alice.to_string() } }))];
        resolver.attach_references(&mut rows, &mut joins, model).await.unwrap();

        assert_eq!(name_of(&rows[0]["author"]), Some("Alice"));
        assert_eq!(f.store.count_calls("find:users"), 1);
    }

    #[tokio::test]
    async fn test_unknown_join_path_is_schema_error() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![doc(json!({ "title": "x" }))];

        for path in ["editor", "title", "comments"] {
            let mut joins = vec![JoinSpec::on([path])];
            let result = ReferenceResolver::new(&f.store, &f.schema)
                .attach_references(&mut rows, &mut joins, model)
                .await;
            assert!(matches!(result, Err(Error::Schema(_))), "path {path}");
        }
    }

    #[tokio::test]
    async fn test_integer_ids_are_resolved() {
        let f = fixture().await;
        f.store
            .insert_one("users", doc(json!({ "_id": 7, "name": "Seven" })))
            .await
            .unwrap();
        f.store.clear_calls();
        let model = f.schema.model("posts").unwrap();
        let mut rows = vec![
            doc(json!({ "title": "one", "author": 7 })),
            doc(json!({ "title": "two", "author": { "_id": 7 } })),
        ];
        let mut joins = vec![JoinSpec::on(["author"])];

        ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await
            .unwrap();

        assert_eq!(name_of(&rows[0]["author"]), Some("Seven"));
        assert_eq!(name_of(&rows[1]["author"]), Some("Seven"));
        assert_eq!(f.store.count_calls("find:users"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_join_paths_are_schema_error() {
        let f = fixture().await;
        let model = f.schema.model("posts").unwrap();
        let resolver = ReferenceResolver::new(&f.store, &f.schema);
        let mut rows = vec![doc(json!({ "title": "one", "author": { "$oid": f.alice.to_string() } }))];
        let mut joins = vec![
            JoinSpec::on(["author"]),
            JoinSpec::on(["author"]).with_filter(doc(json!({ "name": "Alice" }))),
        ];

        let query = resolver.build_join_query(model, Document::new(), &mut joins).await;
        assert!(matches!(query, Err(Error::Schema(_))));

        let result = resolver.attach_references(&mut rows, &mut joins, model).await;
        assert!(matches!(result, Err(Error::Schema(_))));
        assert_eq!(f.store.count_calls("find:users"), 0);
        assert_eq!(rows[0]["author"], Value::Id(f.alice));
    }

    #[tokio::test]
    async fn test_join_paths_must_share_a_model() {
        let f = fixture().await;
        let model = f.schema.model("users").unwrap();
        let mut rows = vec![doc(json!({ "name": "x" }))];
        let mut joins = vec![JoinSpec::on(["org", "best_friend"])];

        let result = ReferenceResolver::new(&f.store, &f.schema)
            .attach_references(&mut rows, &mut joins, model)
            .await;

        assert!(matches!(result, Err(Error::Schema(_))));
    }
}
