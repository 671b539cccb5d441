use crate::document::{Document, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Declared fields of a model or nested document, keyed by field name.
pub type Fields = BTreeMap<String, FieldDefinition>;

/// Top-level schema definition parsed from schema.yaml: a registry of
/// models keyed by model name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub models: BTreeMap<String, ModelDefinition>,
}

/// Definition of a single model, bound to one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Registry key, filled in when the schema is loaded.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub fields: Fields,
}

/// Definition of a single field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub fields: Option<Fields>,
    /// Referenced model, for `reference` fields.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(rename = "values", default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub min_items: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub unique: bool,
    #[serde(skip)]
    pub setter: Option<Setter>,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Boolean,
    Date,
    Number,
    #[serde(alias = "object")]
    Nested,
    Enum,
    #[serde(alias = "ref")]
    Reference,
}

/// A field setter: receives the raw value and the document containing the
/// field, and returns the value to store.
#[derive(Clone)]
pub struct Setter(Arc<dyn Fn(Value, &Document) -> Value + Send + Sync>);

impl Setter {
    pub fn new(f: impl Fn(Value, &Document) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: Value, container: &Document) -> Value {
        (self.0)(value, container)
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Setter(..)")
    }
}

impl SchemaDefinition {
    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Result<&ModelDefinition> {
        self.models
            .get(name)
            .ok_or_else(|| Error::Schema(format!("Model '{name}' not found in schema")))
    }

    /// Attach a setter to the field at `path` (dot-separated) of `model`.
    pub fn set_setter(&mut self, model: &str, path: &str, setter: Setter) -> Result<()> {
        let definition = self
            .models
            .get_mut(model)
            .ok_or_else(|| Error::Schema(format!("Model '{model}' not found in schema")))?;

        let field = find_field_mut(&mut definition.fields, path).ok_or_else(|| {
            Error::Schema(format!("Field '{path}' not declared on model '{model}'"))
        })?;
        field.setter = Some(setter);
        Ok(())
    }
}

impl ModelDefinition {
    /// Collection this model is stored in. Defaults to the model name.
    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    /// Look up a declared field by dot path.
    pub fn field(&self, path: &str) -> Option<&FieldDefinition> {
        find_field(&self.fields, path)
    }
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        FieldDefinition {
            field_type,
            array: false,
            fields: None,
            model: None,
            default: None,
            required: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
            enum_values: None,
            min_items: None,
            max_items: None,
            unique: false,
            setter: None,
        }
    }

    /// Child fields of a nested field. A nested field without children is a
    /// schema definition error.
    pub fn children(&self) -> Result<&Fields> {
        self.fields.as_ref().ok_or_else(|| {
            Error::Schema("Nested field declared without child fields".to_string())
        })
    }

    /// Model a reference field points at. Resolving a reference without one
    /// is a schema definition error.
    pub fn referenced_model(&self) -> Result<&str> {
        self.model.as_deref().ok_or_else(|| {
            Error::Schema("Reference field declared without a referenced model".to_string())
        })
    }

    pub fn is_nested(&self) -> bool {
        self.field_type == FieldType::Nested
    }

    pub fn is_reference(&self) -> bool {
        self.field_type == FieldType::Reference
    }

    /// Arrays of nested documents get element identifiers and timestamps.
    pub fn is_document_array(&self) -> bool {
        self.array && self.is_nested()
    }
}

/// Find a field by dot path. Arrays are transparent: `tags.label` names the
/// `label` field of each element of `tags`.
pub fn find_field<'a>(fields: &'a Fields, path: &str) -> Option<&'a FieldDefinition> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.fields.as_ref()?.get(segment)?;
    }
    Some(current)
}

fn find_field_mut<'a>(fields: &'a mut Fields, path: &str) -> Option<&'a mut FieldDefinition> {
    let mut segments = path.split('.');
    let mut current = fields.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.fields.as_mut()?.get_mut(segment)?;
    }
    Some(current)
}
