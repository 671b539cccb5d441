use crate::document::{join_path, Document, Value, ID_FIELD};
use crate::error::Result;
use crate::schema::{FieldDefinition, FieldType, Fields};
use std::collections::{HashMap, HashSet};

/// One step from a container to a child slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Key(String),
    Index(usize),
}

/// A relocatable handle to exactly one slot of one result row, holding the
/// identifier found there. Valid for a single resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePointer {
    pub row: usize,
    pub slots: Vec<Slot>,
    /// Dot-joined schema path of the reference field.
    pub path: String,
    pub id: Value,
}

impl ReferencePointer {
    /// The slot this pointer addresses, if it still exists.
    pub fn slot_mut<'a>(&self, rows: &'a mut [Document]) -> Option<&'a mut Value> {
        let (first, rest) = self.slots.split_first()?;
        let Slot::Key(key) = first else {
            return None;
        };
        let mut current = rows.get_mut(self.row)?.get_mut(key)?;
        for slot in rest {
            current = match (slot, current) {
                (Slot::Key(key), Value::Object(obj)) => obj.get_mut(key)?,
                (Slot::Index(index), Value::Array(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace the addressed slot. Returns false when the slot is gone.
    pub fn replace(&self, rows: &mut [Document], value: Value) -> bool {
        match self.slot_mut(rows) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Pointers recorded during discovery, bucketed by reference path.
pub type PointerBuckets = HashMap<String, Vec<ReferencePointer>>;

/// Walk every row against `fields` and record a pointer for each reference
/// whose full path is one of `on_paths`. Each recorded slot is reduced to a
/// `{ _id }` placeholder so that a reference that fails to resolve exposes
/// only its identifier.
pub fn discover(rows: &mut [Document], fields: &Fields, on_paths: &HashSet<&str>) -> Result<PointerBuckets> {
    let mut walker = Discovery {
        on_paths,
        buckets: PointerBuckets::new(),
        slots: Vec::new(),
        row: 0,
    };
    for (row, doc) in rows.iter_mut().enumerate() {
        walker.row = row;
        walker.walk_fields(doc, fields, "")?;
    }
    Ok(walker.buckets)
}

struct Discovery<'p> {
    on_paths: &'p HashSet<&'p str>,
    buckets: PointerBuckets,
    slots: Vec<Slot>,
    row: usize,
}

impl Discovery<'_> {
    fn walk_fields(&mut self, doc: &mut Document, fields: &Fields, prefix: &str) -> Result<()> {
        for (key, field) in fields {
            let path = join_path(prefix, key);
            if !self.leads_to_join(&path) {
                continue;
            }
            let Some(value) = doc.get_mut(key) else {
                continue;
            };
            self.slots.push(Slot::Key(key.clone()));
            let result = self.walk_value(value, field, field.array, &path);
            self.slots.pop();
            result?;
        }
        Ok(())
    }

    // Arrays keep the path of their field: elements add a slot, not a segment.
    fn walk_value(&mut self, value: &mut Value, field: &FieldDefinition, array: bool, path: &str) -> Result<()> {
        if array {
            if let Value::Array(items) = value {
                for (index, item) in items.iter_mut().enumerate() {
                    self.slots.push(Slot::Index(index));
                    let result = self.walk_value(item, field, false, path);
                    self.slots.pop();
                    result?;
                }
                return Ok(());
            }
        }

        match field.field_type {
            FieldType::Nested => {
                let children = field.children()?;
                if let Value::Object(doc) = value {
                    self.walk_fields(doc, children, path)?;
                }
            }
            FieldType::Reference if self.on_paths.contains(path) => {
                field.referenced_model()?;
                if let Some(id) = value.reference_id() {
                    *value = placeholder(id.clone());
                    self.buckets
                        .entry(path.to_string())
                        .or_default()
                        .push(ReferencePointer {
                            row: self.row,
                            slots: self.slots.clone(),
                            path: path.to_string(),
                            id,
                        });
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn leads_to_join(&self, path: &str) -> bool {
        self.on_paths.iter().any(|on| {
            on.len() >= path.len()
                && on.starts_with(path)
                && (on.len() == path.len() || on.as_bytes()[path.len()] == b'.')
        })
    }
}

fn placeholder(id: Value) -> Value {
    let mut doc = Document::new();
    doc.insert(ID_FIELD.to_string(), id);
    Value::Object(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ObjectId;
    use crate::schema::parse_schema_str;
    use crate::test_support::doc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields() -> Fields {
        parse_schema_str(
            r#"
models:
  users:
    fields:
      name: { type: string }
  posts:
    fields:
      author: { type: reference, model: users }
      editor: { type: reference, model: users }
      comments:
        type: nested
        array: true
        fields:
          author: { type: reference, model: users }
"#,
        )
        .unwrap()
        .model("posts")
        .unwrap()
        .fields
        .clone()
    }

    #[test]
    fn test_discovery_records_exact_paths_only() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let mut rows = vec![doc(json!({
            "author": { "$oid": a.to_string() },
            "editor": { "$oid": b.to_string() },
            "comments": [{ "author": { "$oid": b.to_string() } }],
        }))];
        let on: HashSet<&str> = ["comments.author"].into_iter().collect();

        let buckets = discover(&mut rows, &fields(), &on).unwrap();

        assert_eq!(buckets.len(), 1);
        let pointers = &buckets["comments.author"];
        assert_eq!(pointers.len(), 1);
        assert_eq!(
            pointers[0].slots,
            vec![Slot::Key("comments".into()), Slot::Index(0), Slot::Key("author".into())]
        );
        assert_eq!(pointers[0].id, Value::Id(b));
        // untouched: not requested
        assert_eq!(rows[0]["author"], Value::Id(a));
    }

    #[test]
    fn test_discovery_normalizes_to_placeholder() {
        let a = ObjectId::new();
        let mut rows = vec![doc(json!({
            "author": { "_id": { "$oid": a.to_string() }, "name": "stale" },
        }))];
        let on: HashSet<&str> = ["author"].into_iter().collect();

        discover(&mut rows, &fields(), &on).unwrap();

        assert_eq!(rows[0]["author"], Value::Object(doc(json!({ "_id": { "$oid": a.to_string() } }))));
    }

    #[test]
    fn test_absent_reference_is_skipped() {
        let mut rows = vec![doc(json!({ "title": "no author" }))];
        let on: HashSet<&str> = ["author"].into_iter().collect();
        let buckets = discover(&mut rows, &fields(), &on).unwrap();
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_pointer_replace() {
        let mut rows = vec![doc(json!({ "comments": [{ "author": 1 }, { "author": 2 }] }))];
        let pointer = ReferencePointer {
            row: 0,
            slots: vec![Slot::Key("comments".into()), Slot::Index(1), Slot::Key("author".into())],
            path: "comments.author".into(),
            id: Value::Int(2),
        };
        assert!(pointer.replace(&mut rows, Value::from("resolved")));
        assert_eq!(rows[0], doc(json!({ "comments": [{ "author": 1 }, { "author": "resolved" }] })));

        let dangling = ReferencePointer { row: 3, ..pointer };
        assert!(!dangling.replace(&mut rows, Value::Null));
    }
}
