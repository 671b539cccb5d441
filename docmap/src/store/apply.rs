//! Application of update payloads (`$set`, `$push`, `$pull`) to a stored
//! document, including `$[ident]` array-filter placeholders.

use super::query::{condition_holds, matches};
use crate::document::{Document, Value};
use crate::error::{Error, Result};

type Visitor<'f> = dyn FnMut(&mut Document, &str) -> Result<()> + 'f;

/// Apply an update payload to `doc` in place.
pub fn apply_update(doc: &mut Document, update: &Document, array_filters: &[Document]) -> Result<()> {
    for (operator, entries) in update {
        let entries = entries.as_object().ok_or_else(|| {
            Error::Store(format!("Operator '{operator}' expects a document of paths"))
        })?;

        for (path, operand) in entries {
            let segments: Vec<&str> = path.split('.').collect();
            match operator.as_str() {
                "$set" => visit(doc, &segments, array_filters, &mut |container, key| {
                    container.insert(key.to_string(), operand.clone());
                    Ok(())
                })?,
                "$push" => {
                    let values = match operand {
                        Value::Object(modifier) if modifier.contains_key("$each") => modifier["$each"]
                            .as_array()
                            .cloned()
                            .ok_or_else(|| Error::Store("$each expects a list".to_string()))?,
                        single => vec![single.clone()],
                    };
                    visit(doc, &segments, array_filters, &mut |container, key| {
                        let entry = container
                            .entry(key.to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        match entry {
                            Value::Array(items) => {
                                items.extend(values.iter().cloned());
                                Ok(())
                            }
                            other => Err(Error::Store(format!(
                                "Cannot $push to field '{key}' holding a {}",
                                other.type_name()
                            ))),
                        }
                    })?
                }
                "$pull" => visit(doc, &segments, array_filters, &mut |container, key| {
                    if let Some(Value::Array(items)) = container.get_mut(key) {
                        items.retain(|item| !pull_matches(item, operand));
                    }
                    Ok(())
                })?,
                other => {
                    return Err(Error::Store(format!("Unsupported update operator '{other}'")));
                }
            }
        }
    }
    Ok(())
}

fn pull_matches(item: &Value, condition: &Value) -> bool {
    match condition {
        Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) => {
            condition_holds(&[item], condition)
        }
        Value::Object(query) => item.as_object().map_or(false, |el| matches(el, query)),
        literal => condition_holds(&[item], literal),
    }
}

fn visit(
    container: &mut Document,
    segments: &[&str],
    filters: &[Document],
    f: &mut Visitor<'_>,
) -> Result<()> {
    let (head, rest) = segments
        .split_first()
        .ok_or_else(|| Error::Store("Empty update path".to_string()))?;
    if rest.is_empty() {
        return f(container, head);
    }
    let child = container
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Document::new()));
    visit_value(child, rest, filters, f)
}

fn visit_value(
    target: &mut Value,
    segments: &[&str],
    filters: &[Document],
    f: &mut Visitor<'_>,
) -> Result<()> {
    let head = segments[0];
    if let Some(ident) = head.strip_prefix("$[").and_then(|s| s.strip_suffix(']')) {
        let rest = &segments[1..];
        if rest.is_empty() {
            return Err(Error::Store(format!(
                "Array filter '{head}' must be followed by a field path"
            )));
        }
        let condition = element_condition(ident, filters)?;
        let Value::Array(items) = target else {
            return Err(Error::Store(format!(
                "Array filter '{head}' applied to a {}",
                target.type_name()
            )));
        };
        for item in items.iter_mut() {
            if let Value::Object(element) = item {
                if matches(element, &condition) {
                    visit(element, rest, filters, f)?;
                }
            }
        }
        return Ok(());
    }

    if target.is_null() {
        *target = Value::Object(Document::new());
    }
    match target {
        Value::Object(doc) => visit(doc, segments, filters, f),
        other => Err(Error::Store(format!(
            "Cannot traverse into '{head}' of a {}",
            other.type_name()
        ))),
    }
}

/// Collect the predicates of every array filter keyed by `ident`, with the
/// identifier prefix stripped.
fn element_condition(ident: &str, filters: &[Document]) -> Result<Document> {
    let prefix = format!("{ident}.");
    let mut condition = Document::new();
    for filter in filters {
        for (key, value) in filter {
            if let Some(field) = key.strip_prefix(&prefix) {
                condition.insert(field.to_string(), value.clone());
            }
        }
    }
    if condition.is_empty() {
        return Err(Error::Store(format!(
            "No array filter found for identifier '{ident}'"
        )));
    }
    Ok(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::from_json_object;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        from_json_object(json).unwrap()
    }

    #[test]
    fn test_set_with_array_filter() {
        let mut d = doc(json!({
            "name": "old",
            "tags": [{ "_id": "A", "label": "a" }, { "_id": "B", "label": "b" }],
        }));
        apply_update(
            &mut d,
            &doc(json!({ "$set": { "name": "new", "tags.$[iA].label": "changed" } })),
            &[doc(json!({ "iA._id": "A" }))],
        )
        .unwrap();
        assert_eq!(
            d,
            doc(json!({
                "name": "new",
                "tags": [{ "_id": "A", "label": "changed" }, { "_id": "B", "label": "b" }],
            }))
        );
    }

    #[test]
    fn test_push_each_and_pull_in() {
        let mut d = doc(json!({ "tags": [{ "_id": "A" }, { "_id": "B" }], "labels": ["x", "y"] }));
        apply_update(
            &mut d,
            &doc(json!({ "$push": { "tags": { "$each": [{ "_id": "C" }] }, "labels": "z" } })),
            &[],
        )
        .unwrap();
        apply_update(
            &mut d,
            &doc(json!({ "$pull": { "tags": { "_id": { "$in": ["A"] } }, "labels": { "$in": ["x"] } } })),
            &[],
        )
        .unwrap();
        assert_eq!(d, doc(json!({ "tags": [{ "_id": "B" }, { "_id": "C" }], "labels": ["y", "z"] })));
    }

    #[test]
    fn test_missing_array_filter_is_an_error() {
        let mut d = doc(json!({ "tags": [{ "_id": "A" }] }));
        let result = apply_update(&mut d, &doc(json!({ "$set": { "tags.$[iA].label": "x" } })), &[]);
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[test]
    fn test_push_to_scalar_is_an_error() {
        let mut d = doc(json!({ "name": "x" }));
        let result = apply_update(&mut d, &doc(json!({ "$push": { "name": "y" } })), &[]);
        assert!(result.is_err());
    }
}
