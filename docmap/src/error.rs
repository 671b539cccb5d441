use crate::document::Document;
use crate::update::ActionKind;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Update requires an _id: no identifier on document for collection '{collection}'")]
    MissingId { collection: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Update failed: {0}")]
    UpdateFailed(Box<UpdateFailure>),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything gathered while executing the actions of a failed update.
///
/// `results` holds the raw result of every action that succeeded, in
/// execution order, so callers can see exactly how far the update got.
#[derive(Debug)]
pub struct UpdateFailure {
    pub errors: Vec<(ActionKind, Error)>,
    pub results: Vec<(ActionKind, Option<Document>)>,
    pub revert_error: Option<Error>,
}

impl fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|(kind, err)| format!("{}: {err}", kind.operator()))
            .collect();
        write!(f, "{}", messages.join("; "))?;
        if let Some(err) = &self.revert_error {
            write!(f, " (revert failed: {err})")?;
        }
        Ok(())
    }
}
