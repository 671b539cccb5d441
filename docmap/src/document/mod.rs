// Document values - the untyped tree every engine operates on

mod id;

pub use id::ObjectId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Field holding a document's identifier.
pub const ID_FIELD: &str = "_id";

/// Field holding a document's modification timestamp.
pub const MODIFIED_FIELD: &str = "modified_at";

/// An untyped nested key-value tree.
pub type Document = BTreeMap<String, Value>;

/// A document value. Dates and identifiers are first-class so coercion
/// has somewhere to put its results.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Id(ObjectId),
    Array(Vec<Value>),
    Object(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Document> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Name of the value's shape, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Id(_) => "identifier",
            Self::Array(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// The raw identifier this value refers to: the value itself when it is
    /// an identifier, integer or string, or its `_id` when it is a document.
    pub fn reference_id(&self) -> Option<Value> {
        match self {
            Self::Id(_) | Self::Int(_) => Some(self.clone()),
            Self::String(s) => Some(
                ObjectId::parse(s)
                    .map(Value::Id)
                    .unwrap_or_else(|| self.clone()),
            ),
            Self::Object(obj) => obj.get(ID_FIELD).and_then(|id| match id {
                Self::Object(_) | Self::Null => None,
                other => other.reference_id(),
            }),
            _ => None,
        }
    }

    /// Stable string key for an identifier-like value, used to index
    /// fetched rows and pointer buckets.
    pub fn id_key(&self) -> Option<String> {
        match self {
            Self::Id(id) => Some(id.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Int(n) => Some(n.to_string()),
            Self::Object(obj) => obj.get(ID_FIELD).and_then(Value::id_key),
            _ => None,
        }
    }

    /// Convert from JSON, recognising `{"$oid": ..}` and `{"$date": ..}`
    /// wrappers.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(arr) => Self::Array(arr.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(JsonValue::String(s)) = obj.get("$oid") {
                        if let Some(id) = ObjectId::parse(s) {
                            return Self::Id(id);
                        }
                    }
                    if let Some(JsonValue::String(s)) = obj.get("$date") {
                        if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                            return Self::Date(date.with_timezone(&Utc));
                        }
                    }
                }
                Self::Object(obj.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect())
            }
        }
    }

    /// Convert to JSON, wrapping identifiers and dates.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(n) => JsonValue::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Date(d) => serde_json::json!({ "$date": d.to_rfc3339() }),
            Self::Id(id) => serde_json::json!({ "$oid": id.to_string() }),
            Self::Array(arr) => JsonValue::Array(arr.iter().map(Value::to_json).collect()),
            Self::Object(obj) => JsonValue::Object(
                obj.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Id(id)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Self::Object(doc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Self::Array(arr)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Value::from_json)
    }
}

/// Build a document from a JSON object. Returns `None` for non-objects.
pub fn from_json_object(json: JsonValue) -> Option<Document> {
    match Value::from_json(json) {
        Value::Object(doc) => Some(doc),
        _ => None,
    }
}

/// Convert a document to a JSON object.
pub fn to_json_object(doc: &Document) -> JsonValue {
    JsonValue::Object(doc.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Join a parent dot path and a key.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
