pub mod document;
pub mod error;
pub mod join;
pub mod model;
pub mod schema;
pub mod store;
pub mod transform;
pub mod update;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use document::{Document, ObjectId, Value};
pub use error::{Error, Result, UpdateFailure};
pub use join::{JoinSpec, ReferenceResolver};
pub use model::{FindOptions, FindOutput, Model, UpdateOptions, UpdateOutcome};
pub use schema::{parse_schema, parse_schema_str, SchemaDefinition, Setter};
pub use store::{DocumentStore, SqliteStore};
pub use transform::Transformer;
pub use update::{compile, ActionKind, CompiledUpdate};
