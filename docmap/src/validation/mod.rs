mod json_schema;

pub use json_schema::json_schema;

use crate::document::{join_path, Document, Value};
use crate::error::{Error, Result};
use crate::schema::{FieldDefinition, FieldType, Fields, ModelDefinition};
use regex::Regex;

/// Result of validating a document
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validate a transformed document against its model definition.
/// If strict mode is on, issues are errors; otherwise they are warnings.
pub fn validate_document(model: &ModelDefinition, doc: &Document) -> ValidationResult {
    let mut result = ValidationResult::default();
    validate_fields(&model.fields, doc, "", model.strict, &mut result);
    result
}

/// Validate before a write. Returns an error if strict validation fails;
/// warnings are logged and returned.
pub fn check_document(model: &ModelDefinition, doc: &Document) -> Result<Vec<String>> {
    let result = validate_document(model, doc);

    if !result.is_ok() {
        return Err(Error::Validation(format!(
            "Document for model '{}' failed validation:\n  - {}",
            model.name,
            result.errors.join("\n  - ")
        )));
    }

    for warning in &result.warnings {
        log::warn!("{}: {warning}", model.name);
    }
    Ok(result.warnings)
}

fn validate_fields(fields: &Fields, doc: &Document, prefix: &str, strict: bool, result: &mut ValidationResult) {
    for (field_name, field_def) in fields {
        let path = join_path(prefix, field_name);
        match doc.get(field_name) {
            None | Some(Value::Null) => {
                if field_def.required {
                    add_issue(result, strict, format!("Required field '{path}' is missing"));
                }
            }
            Some(value) => validate_value(&path, field_def, value, field_def.array, strict, result),
        }
    }
}

fn validate_value(
    path: &str,
    field_def: &FieldDefinition,
    value: &Value,
    array: bool,
    strict: bool,
    result: &mut ValidationResult,
) {
    if array {
        let Some(items) = value.as_array() else {
            add_issue(result, strict, format!("Field '{path}' expected list, got {}", value.type_name()));
            return;
        };
        if let Some(min) = field_def.min_items {
            if items.len() < min {
                add_issue(result, strict, format!("Field '{path}' needs at least {min} items, got {}", items.len()));
            }
        }
        if let Some(max) = field_def.max_items {
            if items.len() > max {
                add_issue(result, strict, format!("Field '{path}' allows at most {max} items, got {}", items.len()));
            }
        }
        if field_def.unique && has_duplicates(items) {
            add_issue(result, strict, format!("Field '{path}' items must be unique"));
        }
        for item in items {
            validate_value(path, field_def, item, false, strict, result);
        }
        return;
    }

    match field_def.field_type {
        FieldType::String => {
            let Some(s) = value.as_str() else {
                add_issue(result, strict, format!("Field '{path}' expected string, got {}", value.type_name()));
                return;
            };
            let length = s.chars().count();
            if let Some(min) = field_def.min_length {
                if length < min {
                    add_issue(result, strict, format!("Field '{path}' is shorter than {min} characters"));
                }
            }
            if let Some(max) = field_def.max_length {
                if length > max {
                    add_issue(result, strict, format!("Field '{path}' is longer than {max} characters"));
                }
            }
            if let Some(pattern) = &field_def.pattern {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => {
                        add_issue(result, strict, format!("Field '{path}' value '{s}' does not match /{pattern}/"));
                    }
                    Ok(_) => {}
                    Err(e) => add_issue(result, strict, format!("Field '{path}' has an invalid pattern: {e}")),
                }
            }
        }
        FieldType::Enum => {
            let allowed = field_def.enum_values.as_deref().unwrap_or_default();
            match value.as_str() {
                Some(s) if allowed.iter().any(|v| v == s) => {}
                Some(s) => add_issue(
                    result,
                    strict,
                    format!("Field '{path}' value '{s}' is not in enum: {allowed:?}"),
                ),
                None => add_issue(result, strict, format!("Field '{path}' expected string, got {}", value.type_name())),
            }
        }
        FieldType::Number => {
            let Some(n) = value.as_f64() else {
                add_issue(result, strict, format!("Field '{path}' expected number, got {}", value.type_name()));
                return;
            };
            if let Some(min) = field_def.min {
                if n < min {
                    add_issue(result, strict, format!("Field '{path}' must be at least {min}, got {n}"));
                }
            }
            if let Some(max) = field_def.max {
                if n > max {
                    add_issue(result, strict, format!("Field '{path}' must be at most {max}, got {n}"));
                }
            }
        }
        FieldType::Boolean => {
            if !matches!(value, Value::Bool(_)) {
                add_issue(result, strict, format!("Field '{path}' expected boolean, got {}", value.type_name()));
            }
        }
        FieldType::Date => {
            if !matches!(value, Value::Date(_)) {
                add_issue(result, strict, format!("Field '{path}' expected date, got {}", value.type_name()));
            }
        }
        FieldType::Reference => {
            if value.as_id().is_none() {
                add_issue(
                    result,
                    strict,
                    format!("Field '{path}' (reference) expected identifier, got {}", value.type_name()),
                );
            }
        }
        FieldType::Nested => match (value, &field_def.fields) {
            (Value::Object(doc), Some(children)) => validate_fields(children, doc, path, strict, result),
            (Value::Object(_), None) => {}
            (other, _) => {
                add_issue(result, strict, format!("Field '{path}' expected object, got {}", other.type_name()));
            }
        },
    }
}

fn has_duplicates(items: &[Value]) -> bool {
    items
        .iter()
        .enumerate()
        .any(|(i, item)| items[..i].contains(item))
}

fn add_issue(result: &mut ValidationResult, strict: bool, message: String) {
    if strict {
        result.errors.push(message);
    } else {
        result.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ObjectId;
    use crate::schema::{parse_schema_str, SchemaDefinition};
    use crate::test_support::doc;
    use serde_json::json;

    fn test_schema() -> SchemaDefinition {
        parse_schema_str(
            r#"
models:
  users:
    strict: true
    fields:
      name: { type: string, required: true, min_length: 2, max_length: 20 }
      email: { type: string, pattern: "^[^@]+@[^@]+$" }
      role: { type: enum, values: [admin, member, guest] }
      age: { type: number, min: 0, max: 150 }
      active: { type: boolean }
      joined: { type: date }
      manager: { type: reference, model: users }
      tags: { type: string, array: true, unique: true, max_items: 3 }
      address:
        type: nested
        fields:
          city: { type: string, required: true }
  events:
    fields:
      kind: { type: string, required: true }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_user() {
        let schema = test_schema();
        let model = schema.model("users").unwrap();
        let mut data = doc(json!({
            "name": "Alice",
            "email": "alice@test.com",
            "role": "admin",
            "age": 30,
            "active": true,
            "manager": { "$oid": ObjectId::new().to_string() },
            "tags": ["a", "b"],
            "address": { "city": "Oslo" },
        }));
        data.insert("joined".into(), Value::Date(chrono::Utc::now()));

        let result = validate_document(model, &data);
        assert!(result.is_ok(), "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = test_schema();
        let model = schema.model("users").unwrap();

        let result = validate_document(model, &doc(json!({ "address": {} })));
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("'name'")));
        assert!(result.errors.iter().any(|e| e.contains("'address.city'")));
    }

    #[test]
    fn test_invalid_enum_value() {
        let schema = test_schema();
        let model = schema.model("users").unwrap();

        let result = validate_document(model, &doc(json!({ "name": "Alice", "role": "superadmin" })));
        assert!(result.errors.iter().any(|e| e.contains("superadmin")));
    }

    #[test]
    fn test_bounds_and_pattern() {
        let schema = test_schema();
        let model = schema.model("users").unwrap();

        let result = validate_document(
            model,
            &doc(json!({
                "name": "A",
                "email": "nope",
                "age": 200,
                "tags": ["x", "x", "y", "z"],
            })),
        );
        assert_eq!(result.errors.len(), 5, "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_type_mismatch() {
        let schema = test_schema();
        let model = schema.model("users").unwrap();

        let result = validate_document(
            model,
            &doc(json!({ "name": 42, "active": "yes", "joined": "2024-01-01", "manager": "bob" })),
        );
        assert_eq!(result.errors.len(), 4, "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_non_strict_produces_warnings() {
        let schema = test_schema();
        let model = schema.model("events").unwrap();

        let result = validate_document(model, &doc(json!({})));
        assert!(result.is_ok());
        assert!(result.has_warnings());

        let warnings = check_document(model, &doc(json!({}))).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_strict_check_rejects() {
        let schema = test_schema();
        let model = schema.model("users").unwrap();

        let result = check_document(model, &doc(json!({})));
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
