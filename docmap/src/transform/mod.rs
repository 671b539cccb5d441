//! Transform engine: defaults, setters, coercion and generated fields,
//! applied to a document in place before it is persisted.

pub mod coerce;

use crate::document::{Document, ObjectId, Value, ID_FIELD, MODIFIED_FIELD};
use crate::error::Result;
use crate::schema::{FieldDefinition, FieldType, Fields, ModelDefinition};
use chrono::{DateTime, Utc};

/// One transform pass. All timestamps written during the pass share `now`.
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    is_insert: bool,
    now: DateTime<Utc>,
}

impl Transformer {
    pub fn new(is_insert: bool, now: DateTime<Utc>) -> Self {
        Transformer { is_insert, now }
    }

    /// A pass for new documents: defaults are installed and missing
    /// identifiers generated.
    pub fn insert() -> Self {
        Self::new(true, Utc::now())
    }

    /// A pass for partial updates: no defaults, no new identifiers.
    pub fn update() -> Self {
        Self::new(false, Utc::now())
    }

    pub fn is_insert(&self) -> bool {
        self.is_insert
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Transform a whole model document, including its identifier and root
    /// modification timestamp.
    pub fn transform_document(&self, doc: &mut Document, model: &ModelDefinition) -> Result<()> {
        self.stamp_identifier(doc);
        self.transform_fields(doc, &model.fields)?;
        doc.insert(MODIFIED_FIELD.to_string(), Value::Date(self.now));
        Ok(())
    }

    /// Transform every declared field of `doc`. Undeclared fields are left
    /// untouched.
    pub fn transform_fields(&self, doc: &mut Document, fields: &Fields) -> Result<()> {
        for (key, field) in fields {
            self.transform_slot(doc, key, field)?;
        }
        Ok(())
    }

    fn transform_slot(&self, container: &mut Document, key: &str, field: &FieldDefinition) -> Result<()> {
        let mut value = match container.remove(key) {
            Some(v) if !v.is_null() => v,
            existing => match (&field.default, self.is_insert) {
                (Some(default), true) => default.clone(),
                _ => {
                    if let Some(v) = existing {
                        container.insert(key.to_string(), v);
                    }
                    return Ok(());
                }
            },
        };

        let result = self.transform_value(&mut value, field, field.array, container);
        container.insert(key.to_string(), value);
        result
    }

    /// Transform one value against its field definition. `array` is passed
    /// separately so array elements can be transformed with the flag
    /// cleared. `container` is the document holding the field, handed to
    /// setters.
    pub fn transform_value(
        &self,
        value: &mut Value,
        field: &FieldDefinition,
        array: bool,
        container: &Document,
    ) -> Result<()> {
        if array {
            if !matches!(value, Value::Array(_)) {
                let single = std::mem::take(value);
                *value = Value::Array(vec![single]);
            }
            if let Value::Array(items) = value {
                for item in items.iter_mut() {
                    if field.is_nested() {
                        if let Value::Object(element) = item {
                            self.stamp_element(element);
                        }
                    }
                    self.transform_value(item, field, false, container)?;
                }
            }
            return Ok(());
        }

        if let Some(setter) = &field.setter {
            let raw = std::mem::take(value);
            *value = setter.apply(raw, container);
        }

        match field.field_type {
            FieldType::Nested => {
                let children = field.children()?;
                if let Value::Object(doc) = value {
                    self.transform_fields(doc, children)?;
                }
            }
            FieldType::Number => {
                if let Some(number) = coerce::to_number(value) {
                    *value = number;
                }
            }
            FieldType::Date => {
                if let Some(date) = coerce::to_date(value) {
                    *value = date;
                }
            }
            FieldType::Boolean => {
                if !value.is_null() {
                    *value = coerce::to_boolean(value);
                }
            }
            FieldType::Reference => {
                if let Some(id) = coerce::to_reference(value) {
                    *value = id;
                }
            }
            FieldType::String | FieldType::Enum => {}
        }

        Ok(())
    }

    /// Stamp an element of a nested-document array with a fresh
    /// modification timestamp and an identifier.
    pub fn stamp_element(&self, element: &mut Document) {
        element.insert(MODIFIED_FIELD.to_string(), Value::Date(self.now));
        self.stamp_identifier(element);
    }

    fn stamp_identifier(&self, doc: &mut Document) {
        match doc.get_mut(ID_FIELD) {
            Some(id) if !id.is_null() => {
                if let Some(normalized) = coerce::to_reference(id) {
                    *id = normalized;
                }
            }
            _ => {
                if self.is_insert {
                    doc.insert(ID_FIELD.to_string(), Value::Id(ObjectId::new()));
                }
            }
        }
    }
}
