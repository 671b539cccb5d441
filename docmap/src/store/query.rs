//! Query matching and projection over in-memory documents.

use crate::document::{Document, ObjectId, Value, ID_FIELD};
use std::cmp::Ordering;

/// Whether `doc` satisfies `query`.
pub fn matches(doc: &Document, query: &Document) -> bool {
    query.iter().all(|(key, condition)| match key.as_str() {
        "$and" => sub_queries(condition).all(|q| matches(doc, q)),
        "$or" => sub_queries(condition).any(|q| matches(doc, q)),
        path => {
            let values = resolve_path(doc, path);
            condition_holds(&values, condition)
        }
    })
}

fn sub_queries(condition: &Value) -> impl Iterator<Item = &Document> {
    condition
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// Every value reachable at `path`. Arrays are traversed transparently and
/// a terminal array contributes its elements as well as itself.
pub fn resolve_path<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = Vec::new();
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return current;
    };
    current.extend(doc.get(first));

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(obj) => next.extend(obj.get(segment)),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Object(obj) = item {
                            next.extend(obj.get(segment));
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    let mut resolved = Vec::new();
    for value in current {
        resolved.push(value);
        if let Value::Array(items) = value {
            resolved.extend(items.iter());
        }
    }
    resolved
}

fn is_operator_document(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |obj| !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')))
}

/// Whether the values found at a path satisfy a condition: either an
/// operator document or a literal to compare for equality.
pub fn condition_holds(values: &[&Value], condition: &Value) -> bool {
    let Some(operators) = condition.as_object().filter(|_| is_operator_document(condition)) else {
        return values.iter().any(|v| values_equal(v, condition));
    };

    operators.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => values.iter().any(|v| values_equal(v, operand)),
        "$ne" => !values.iter().any(|v| values_equal(v, operand)),
        "$in" => operand
            .as_array()
            .map_or(false, |set| values.iter().any(|v| set.iter().any(|s| values_equal(v, s)))),
        "$nin" => operand
            .as_array()
            .map_or(true, |set| !values.iter().any(|v| set.iter().any(|s| values_equal(v, s)))),
        "$gt" => values.iter().any(|v| compare(v, operand) == Some(Ordering::Greater)),
        "$gte" => values
            .iter()
            .any(|v| matches!(compare(v, operand), Some(Ordering::Greater | Ordering::Equal))),
        "$lt" => values.iter().any(|v| compare(v, operand) == Some(Ordering::Less)),
        "$lte" => values
            .iter()
            .any(|v| matches!(compare(v, operand), Some(Ordering::Less | Ordering::Equal))),
        "$exists" => {
            let wanted = !matches!(operand, Value::Bool(false) | Value::Int(0));
            !values.is_empty() == wanted
        }
        other => {
            log::warn!("Unsupported query operator '{other}' treated as non-matching");
            false
        }
    })
}

/// Equality that treats numbers numerically and identifiers as equal to
/// their string form.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_f64() == b.as_f64(),
        (Value::Id(id), Value::String(s)) | (Value::String(s), Value::Id(id)) => {
            ObjectId::parse(s) == Some(*id)
        }
        _ => a == b,
    }
}

/// Ordering between comparable values of the same kind.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::Id(x), Value::Id(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Apply an inclusion or exclusion projection. `_id` is kept unless it is
/// explicitly excluded.
pub fn project(doc: &Document, projection: &Document) -> Document {
    let inclusive = projection
        .iter()
        .any(|(key, flag)| key != ID_FIELD && is_truthy_flag(flag));

    if inclusive {
        let mut out = Document::new();
        let keep_id = projection.get(ID_FIELD).map_or(true, is_truthy_flag);
        if keep_id {
            if let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD.to_string(), id.clone());
            }
        }
        for (path, flag) in projection {
            if path != ID_FIELD && is_truthy_flag(flag) {
                let segments: Vec<&str> = path.split('.').collect();
                include_path(doc, &mut out, &segments);
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for path in projection.keys() {
            let segments: Vec<&str> = path.split('.').collect();
            exclude_path(&mut out, &segments);
        }
        out
    }
}

pub(crate) fn is_truthy_flag(flag: &Value) -> bool {
    !matches!(flag, Value::Bool(false) | Value::Int(0) | Value::Null)
}

fn include_path(src: &Document, dst: &mut Document, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = src.get(*head) else {
        return;
    };
    if rest.is_empty() {
        dst.insert(head.to_string(), value.clone());
        return;
    }

    match value {
        Value::Object(inner) => {
            let entry = dst
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if let Value::Object(target) = entry {
                include_path(inner, target, rest);
            }
        }
        Value::Array(items) => {
            let entry = dst.entry(head.to_string()).or_insert_with(|| {
                Value::Array(items.iter().map(|_| Value::Object(Document::new())).collect())
            });
            if let Value::Array(targets) = entry {
                for (item, target) in items.iter().zip(targets.iter_mut()) {
                    if let (Value::Object(inner), Value::Object(target)) = (item, target) {
                        include_path(inner, target, rest);
                    }
                }
            }
        }
        _ => {}
    }
}

fn exclude_path(doc: &mut Document, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        doc.remove(*head);
        return;
    }
    match doc.get_mut(*head) {
        Some(Value::Object(inner)) => exclude_path(inner, rest),
        Some(Value::Array(items)) => {
            for item in items {
                if let Value::Object(inner) = item {
                    exclude_path(inner, rest);
                }
            }
        }
        _ => {}
    }
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
    fn test_equality_and_operators() {
        let d = doc(json!({ "name": "Alice", "age": 30, "tags": ["a", "b"] }));
        assert!(matches(&d, &doc(json!({ "name": "Alice" }))));
        assert!(matches(&d, &doc(json!({ "age": 30.0 }))));
        assert!(matches(&d, &doc(json!({ "tags": "b" }))));
        assert!(matches(&d, &doc(json!({ "age": { "$gte": 18, "$lt": 65 } }))));
        assert!(matches(&d, &doc(json!({ "name": { "$in": ["Bob", "Alice"] } }))));
        assert!(!matches(&d, &doc(json!({ "name": { "$nin": ["Alice"] } }))));
        assert!(matches(&d, &doc(json!({ "email": { "$exists": false } }))));
        assert!(!matches(&d, &doc(json!({ "name": { "$ne": "Alice" } }))));
    }

    #[test]
    fn test_nested_paths_through_arrays() {
        let d = doc(json!({ "tags": [{ "label": "x" }, { "label": "y" }] }));
        assert!(matches(&d, &doc(json!({ "tags.label": "y" }))));
        assert!(!matches(&d, &doc(json!({ "tags.label": "z" }))));
    }

    #[test]
    fn test_and_or() {
        let d = doc(json!({ "a": 1, "b": 2 }));
        assert!(matches(&d, &doc(json!({ "$and": [{ "a": 1 }, { "b": 2 }] }))));
        assert!(matches(&d, &doc(json!({ "$or": [{ "a": 5 }, { "b": 2 }] }))));
        assert!(!matches(&d, &doc(json!({ "$or": [{ "a": 5 }, { "b": 5 }] }))));
    }

    #[test]
    fn test_identifier_matches_string_form() {
        let id = ObjectId::new();
        let d = doc(json!({ "_id": { "$oid": id.to_string() } }));
        assert!(matches(&d, &doc(json!({ "_id": id.to_string() }))));
    }

    #[test]
    fn test_inclusion_projection() {
        let d = doc(json!({ "_id": 1, "name": "A", "secret": "s", "address": { "city": "Oslo", "zip": 1 } }));
        let projected = project(&d, &doc(json!({ "name": 1, "address.city": 1 })));
        assert_eq!(projected, doc(json!({ "_id": 1, "name": "A", "address": { "city": "Oslo" } })));
    }

    #[test]
    fn test_exclusion_projection() {
        let d = doc(json!({ "_id": 1, "name": "A", "secret": "s" }));
        let projected = project(&d, &doc(json!({ "secret": 0 })));
        assert_eq!(projected, doc(json!({ "_id": 1, "name": "A" })));
    }
}
