use super::types::{FieldDefinition, FieldType, Fields, SchemaDefinition};
use crate::error::{Error, Result};
use std::path::Path;

/// Parse a schema.yaml file into a SchemaDefinition
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a SchemaDefinition and check it.
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let mut schema: SchemaDefinition = serde_yaml::from_str(content)?;
    for (name, model) in schema.models.iter_mut() {
        model.name = name.clone();
    }
    check_schema(&schema)?;
    Ok(schema)
}

/// Static checks that catch configuration defects before any document is
/// touched.
pub fn check_schema(schema: &SchemaDefinition) -> Result<()> {
    for (name, model) in &schema.models {
        check_fields(schema, name, "", &model.fields)?;
    }
    Ok(())
}

fn check_fields(schema: &SchemaDefinition, model: &str, prefix: &str, fields: &Fields) -> Result<()> {
    for (field_name, field) in fields {
        let path = crate::document::join_path(prefix, field_name);
        check_field(schema, model, &path, field)?;
    }
    Ok(())
}

fn check_field(
    schema: &SchemaDefinition,
    model: &str,
    path: &str,
    field: &FieldDefinition,
) -> Result<()> {
    match field.field_type {
        FieldType::Nested => {
            let children = field.fields.as_ref().ok_or_else(|| {
                Error::Schema(format!("Field '{model}.{path}' is nested but declares no fields"))
            })?;
            check_fields(schema, model, path, children)?;
        }
        FieldType::Reference => {
            let target = field.model.as_deref().ok_or_else(|| {
                Error::Schema(format!("Reference field '{model}.{path}' must declare a model"))
            })?;
            if !schema.models.contains_key(target) {
                return Err(Error::Schema(format!(
                    "Reference field '{model}.{path}' targets unknown model '{target}'"
                )));
            }
        }
        FieldType::Enum => {
            if field.enum_values.as_ref().map_or(true, |v| v.is_empty()) {
                return Err(Error::Schema(format!(
                    "Enum field '{model}.{path}' must declare values"
                )));
            }
        }
        _ => {}
    }

    if let Some(pattern) = &field.pattern {
        regex::Regex::new(pattern).map_err(|e| {
            Error::Schema(format!("Field '{model}.{path}' has an invalid pattern: {e}"))
        })?;
    }

    Ok(())
}
