//! Update compiler: turns a partial, directive-based update document into
//! at most one atomic action per kind.
//!
//! Array fields take directives instead of raw values:
//!
//! ```text
//! tags:
//!   $replace: [...]   # wholesale replacement
//!   $delete: [...]    # identifiers (document arrays) or values to remove
//!   $update: [...]    # elements with an _id are edited in place, the rest appended
//! ```
//!
//! A raw array is treated as `$replace`.

use crate::document::{join_path, Document, Value, ID_FIELD, MODIFIED_FIELD};
use crate::error::{Error, Result};
use crate::schema::{FieldDefinition, Fields, ModelDefinition};
use crate::transform::{coerce, Transformer};

const REPLACE: &str = "$replace";
const DELETE: &str = "$delete";
const UPDATE: &str = "$update";

/// The three canonical update actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Assign,
    Append,
    Remove,
}

impl ActionKind {
    /// Execution order. Assign goes first so the modification timestamp is
    /// written before anything else changes.
    pub const ORDER: [ActionKind; 3] = [ActionKind::Assign, ActionKind::Append, ActionKind::Remove];

    /// Store update operator for this kind.
    pub fn operator(&self) -> &'static str {
        match self {
            ActionKind::Assign => "$set",
            ActionKind::Append => "$push",
            ActionKind::Remove => "$pull",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Targets one array element by its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayFilter {
    pub identifier: String,
    pub id: Value,
}

impl ArrayFilter {
    /// Identifiers must be alphanumeric and distinct per element id. Integer
    /// ids get `n`/`m` (negative), alphanumeric keys keep their text after
    /// `i`, and anything else is hex-encoded after `x`.
    fn for_element(id: Value) -> Option<Self> {
        let identifier = match &id {
            Value::Int(n) if *n < 0 => format!("m{}", n.unsigned_abs()),
            Value::Int(n) => format!("n{n}"),
            _ => {
                let key = id.id_key()?;
                if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()) {
                    format!("i{key}")
                } else {
                    let hex: String = key.bytes().map(|b| format!("{b:02x}")).collect();
                    format!("x{hex}")
                }
            }
        };
        Some(ArrayFilter { identifier, id })
    }

    /// `{ "<identifier>._id": <id> }`
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(format!("{}.{ID_FIELD}", self.identifier), self.id.clone());
        doc
    }
}

/// One atomic update action: dot paths to operands, plus the array filters
/// those paths need.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAction {
    pub kind: ActionKind,
    pub entries: Document,
    pub array_filters: Vec<ArrayFilter>,
}

impl UpdateAction {
    fn new(kind: ActionKind) -> Self {
        UpdateAction {
            kind,
            entries: Document::new(),
            array_filters: Vec::new(),
        }
    }

    /// The store payload, e.g. `{ "$set": { ... } }`.
    pub fn to_payload(&self) -> Document {
        let mut payload = Document::new();
        payload.insert(self.kind.operator().to_string(), Value::Object(self.entries.clone()));
        payload
    }

    pub fn filter_documents(&self) -> Vec<Document> {
        self.array_filters.iter().map(ArrayFilter::to_document).collect()
    }

    fn add(&mut self, path: String, operand: Value, filters: &[ArrayFilter]) {
        self.entries.insert(path, operand);
        for filter in filters {
            if !self.array_filters.iter().any(|f| f.id == filter.id) {
                self.array_filters.push(filter.clone());
            }
        }
    }
}

/// Compiled actions, in execution order. Kinds with no entries are omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUpdate {
    actions: Vec<UpdateAction>,
}

impl CompiledUpdate {
    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    pub fn action(&self, kind: ActionKind) -> Option<&UpdateAction> {
        self.actions.iter().find(|a| a.kind == kind)
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(|a| a.kind).collect()
    }

    /// A single action is applied atomically by the store; several are not.
    pub fn is_atomic(&self) -> bool {
        self.actions.len() <= 1
    }
}

/// Compile `update` against `model`. The identifier is not part of the
/// output; the root modification timestamp always is.
pub fn compile(update: &Document, model: &ModelDefinition, transformer: &Transformer) -> Result<CompiledUpdate> {
    let mut compiler = Compiler {
        transformer,
        inserter: Transformer::new(true, transformer.now()),
        groups: ActionKind::ORDER.map(UpdateAction::new),
    };

    compiler.walk(update, &model.fields, "", &[])?;
    compiler.groups[ActionKind::Assign.index()].add(
        MODIFIED_FIELD.to_string(),
        Value::Date(transformer.now()),
        &[],
    );

    let actions: Vec<UpdateAction> = compiler
        .groups
        .into_iter()
        .filter(|action| !action.entries.is_empty())
        .collect();
    log::debug!(
        "compiled update for '{}' into {:?}",
        model.name,
        actions.iter().map(|a| a.kind).collect::<Vec<_>>()
    );
    Ok(CompiledUpdate { actions })
}

struct Compiler<'t> {
    transformer: &'t Transformer,
    inserter: Transformer,
    groups: [UpdateAction; 3],
}

impl Compiler<'_> {
    fn push(&mut self, kind: ActionKind, path: String, operand: Value, filters: &[ArrayFilter]) {
        self.groups[kind.index()].add(path, operand, filters);
    }

    fn walk(&mut self, update: &Document, fields: &Fields, prefix: &str, filters: &[ArrayFilter]) -> Result<()> {
        for (key, value) in update {
            if key == ID_FIELD || key == MODIFIED_FIELD {
                continue;
            }
            let path = join_path(prefix, key);

            let Some(field) = fields.get(key) else {
                self.push(ActionKind::Assign, path, value.clone(), filters);
                continue;
            };

            if field.array {
                self.compile_array(value, field, path, update, filters)?;
            } else if let (true, Value::Object(partial)) = (field.is_nested(), value) {
                self.walk(partial, field.children()?, &path, filters)?;
            } else {
                let mut value = value.clone();
                self.transformer.transform_value(&mut value, field, false, update)?;
                self.push(ActionKind::Assign, path, value, filters);
            }
        }
        Ok(())
    }

    fn compile_array(
        &mut self,
        value: &Value,
        field: &FieldDefinition,
        path: String,
        container: &Document,
        filters: &[ArrayFilter],
    ) -> Result<()> {
        let directives = match value {
            Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
            raw => {
                let mut array = raw.clone();
                self.inserter.transform_value(&mut array, field, true, container)?;
                self.push(ActionKind::Assign, path, array, filters);
                return Ok(());
            }
        };

        for (directive, operand) in directives {
            match directive.as_str() {
                REPLACE => {
                    let mut array = operand.clone();
                    self.inserter.transform_value(&mut array, field, true, container)?;
                    self.push(ActionKind::Assign, path.clone(), array, filters);
                }
                DELETE => {
                    let condition = self.delete_condition(operand, field, &path, container)?;
                    self.push(ActionKind::Remove, path.clone(), condition, filters);
                }
                UPDATE => self.compile_elements(operand, field, &path, container, filters)?,
                other => {
                    return Err(Error::Validation(format!(
                        "Unknown array directive '{other}' on field '{path}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn delete_condition(
        &self,
        operand: &Value,
        field: &FieldDefinition,
        path: &str,
        container: &Document,
    ) -> Result<Value> {
        let items = directive_items(operand, DELETE, path)?;

        let mut members = Vec::with_capacity(items.len());
        for item in items {
            if field.is_nested() {
                let id = item.reference_id().unwrap_or_else(|| item.clone());
                members.push(coerce::to_reference(&id).unwrap_or(id));
            } else {
                let mut item = item.clone();
                self.transformer.transform_value(&mut item, field, false, container)?;
                members.push(item);
            }
        }

        let mut membership = Document::new();
        membership.insert("$in".to_string(), Value::Array(members));
        if !field.is_nested() {
            return Ok(Value::Object(membership));
        }
        let mut condition = Document::new();
        condition.insert(ID_FIELD.to_string(), Value::Object(membership));
        Ok(Value::Object(condition))
    }

    fn compile_elements(
        &mut self,
        operand: &Value,
        field: &FieldDefinition,
        path: &str,
        container: &Document,
        filters: &[ArrayFilter],
    ) -> Result<()> {
        let mut appended = Vec::new();

        for item in directive_items(operand, UPDATE, path)? {
            let existing = match item {
                Value::Object(element) if field.is_nested() => element
                    .get(ID_FIELD)
                    .filter(|id| !id.is_null())
                    .map(|id| (element, id)),
                _ => None,
            };

            let Some((element, id)) = existing else {
                let mut item = item.clone();
                if let (true, Value::Object(element)) = (field.is_nested(), &mut item) {
                    self.inserter.stamp_element(element);
                }
                self.inserter.transform_value(&mut item, field, false, container)?;
                appended.push(item);
                continue;
            };

            let id = coerce::to_reference(id).unwrap_or_else(|| id.clone());
            let filter = ArrayFilter::for_element(id).ok_or_else(|| {
                Error::Validation(format!("Element of '{path}' has an unusable _id"))
            })?;
            let element_path = format!("{path}.$[{}]", filter.identifier);
            let mut scoped = filters.to_vec();
            scoped.push(filter);

            self.walk(element, field.children()?, &element_path, &scoped)?;
            self.push(
                ActionKind::Assign,
                join_path(&element_path, MODIFIED_FIELD),
                Value::Date(self.transformer.now()),
                &scoped,
            );
        }

        if !appended.is_empty() {
            let mut each = Document::new();
            each.insert("$each".to_string(), Value::Array(appended));
            self.push(ActionKind::Append, path.to_string(), Value::Object(each), filters);
        }
        Ok(())
    }
}

fn directive_items<'v>(operand: &'v Value, directive: &str, path: &str) -> Result<&'v Vec<Value>> {
    operand.as_array().ok_or_else(|| {
        Error::Validation(format!(
            "'{directive}' on field '{path}' expects a list, got {}",
            operand.type_name()
        ))
    })
}
