// Validator documents installed on the store alongside each collection

use crate::document::{Document, Value, ID_FIELD, MODIFIED_FIELD};
use crate::schema::{FieldDefinition, FieldType, Fields, ModelDefinition};

/// Emit `{ "$jsonSchema": { ... } }` for a model.
pub fn json_schema(model: &ModelDefinition) -> Document {
    let mut validator = Document::new();
    validator.insert("$jsonSchema".to_string(), Value::Object(object_schema(&model.fields)));
    validator
}

fn object_schema(fields: &Fields) -> Document {
    let mut schema = Document::new();
    schema.insert("bsonType".into(), "object".into());

    let required: Vec<Value> = fields
        .iter()
        .filter(|(_, field)| field.required)
        .map(|(name, _)| Value::from(name.as_str()))
        .collect();
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }

    let properties: Document = fields
        .iter()
        .map(|(name, field)| (name.clone(), Value::Object(field_schema(field))))
        .collect();
    schema.insert("properties".into(), Value::Object(properties));
    schema
}

fn field_schema(field: &FieldDefinition) -> Document {
    let mut element = element_schema(field);
    if !field.array {
        return element;
    }

    if field.is_nested() {
        if let Some(Value::Object(properties)) = element.get_mut("properties") {
            properties.insert(ID_FIELD.to_string(), bson_type("objectId"));
            properties.insert(MODIFIED_FIELD.to_string(), bson_type("date"));
        }
    }

    let mut schema = Document::new();
    schema.insert("bsonType".into(), "array".into());
    schema.insert("items".into(), Value::Object(element));
    if let Some(min) = field.min_items {
        schema.insert("minItems".into(), Value::Int(min as i64));
    }
    if let Some(max) = field.max_items {
        schema.insert("maxItems".into(), Value::Int(max as i64));
    }
    if field.unique && !field.is_nested() {
        schema.insert("uniqueItems".into(), Value::Bool(true));
    }
    schema
}

fn element_schema(field: &FieldDefinition) -> Document {
    let mut schema = match (field.field_type, &field.fields) {
        (FieldType::Nested, Some(children)) => return object_schema(children),
        (FieldType::Nested, None) => return doc_of("bsonType", "object".into()),
        (FieldType::String | FieldType::Enum, _) => doc_of("bsonType", "string".into()),
        (FieldType::Boolean, _) => doc_of("bsonType", "bool".into()),
        (FieldType::Date, _) => doc_of("bsonType", "date".into()),
        (FieldType::Reference, _) => doc_of("bsonType", "objectId".into()),
        (FieldType::Number, _) => doc_of(
            "bsonType",
            Value::Array(vec!["double".into(), "int".into(), "long".into()]),
        ),
    };

    if let Some(min) = field.min_length {
        schema.insert("minLength".into(), Value::Int(min as i64));
    }
    if let Some(max) = field.max_length {
        schema.insert("maxLength".into(), Value::Int(max as i64));
    }
    if let Some(min) = field.min {
        schema.insert("minimum".into(), Value::Float(min));
    }
    if let Some(max) = field.max {
        schema.insert("maximum".into(), Value::Float(max));
    }
    if let Some(pattern) = &field.pattern {
        schema.insert("pattern".into(), pattern.as_str().into());
    }
    if let Some(values) = &field.enum_values {
        schema.insert(
            "enum".into(),
            Value::Array(values.iter().map(|v| Value::from(v.as_str())).collect()),
        );
    }
    schema
}

fn bson_type(name: &str) -> Value {
    Value::Object(doc_of("bsonType", name.into()))
}

fn doc_of(key: &str, value: Value) -> Document {
    let mut doc = Document::new();
    doc.insert(key.to_string(), value);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use crate::test_support::doc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_emits_types_bounds_and_nested_shapes() {
        let schema = parse_schema_str(
            r#"
models:
  users:
    fields:
      name: { type: string, required: true, min_length: 1, max_length: 5 }
      role: { type: enum, values: [admin, guest] }
      age: { type: number, min: 0 }
      tags: { type: string, array: true, unique: true, max_items: 3 }
      friend: { type: reference, model: users }
      notes:
        type: nested
        array: true
        fields:
          body: { type: string, required: true }
"#,
        )
        .unwrap();

        let validator = json_schema(schema.model("users").unwrap());

        assert_eq!(
            validator,
            doc(json!({ "$jsonSchema": {
                "bsonType": "object",
                "required": ["name"],
                "properties": {
                    "name": { "bsonType": "string", "minLength": 1, "maxLength": 5 },
                    "role": { "bsonType": "string", "enum": ["admin", "guest"] },
                    "age": { "bsonType": ["double", "int", "long"], "minimum": 0.0 },
                    "tags": {
                        "bsonType": "array",
                        "items": { "bsonType": "string" },
                        "maxItems": 3,
                        "uniqueItems": true,
                    },
                    "friend": { "bsonType": "objectId" },
                    "notes": {
                        "bsonType": "array",
                        "items": {
                            "bsonType": "object",
                            "required": ["body"],
                            "properties": {
                                "body": { "bsonType": "string" },
                                "_id": { "bsonType": "objectId" },
                                "modified_at": { "bsonType": "date" },
                            },
                        },
                    },
                },
            } }))
        );
    }
}
