mod parser;
mod types;

pub use parser::{check_schema, parse_schema, parse_schema_str};
pub use types::{
    find_field, FieldDefinition, FieldType, Fields, ModelDefinition, SchemaDefinition, Setter,
};
