use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("view not found: {0}")]
    ViewNotFound(String),

    #[error("prefix not found: {0}")]
    PrefixNotFound(String),

    #[error("ip address not found: {0}")]
    AddressNotFound(String),

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("duplicate view: {0}")]
    DuplicateView(String),

    #[error("duplicate prefix: {0}")]
    DuplicatePrefix(String),

    #[error("duplicate ip address: {0}")]
    DuplicateAddress(String),

    #[error("duplicate zone: {0}")]
    DuplicateZone(String),

    #[error("invalid record data: {0}")]
    InvalidRecord(String),

    /// Record data would be invalid under a candidate view. Carries the
    /// human readable messages of every check that failed.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// An edit was rejected; nothing was persisted.
    #[error("{0}")]
    Rejected(FieldErrors),

    /// A view import was rejected; nothing was persisted.
    #[error("import rejected: {}", format_rows(.0))]
    ImportRejected(Vec<RowErrors>),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single message attached to a form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Ordered, append-only list of field errors collected by one edit,
/// import or bulk-edit operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn add_all<I, S>(&mut self, field: &str, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for message in messages {
            self.add(field, message);
        }
    }

    pub fn append(&mut self, other: FieldErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }

    /// Messages attached to one field, in insertion order.
    pub fn messages_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// Turn a non-empty list into a rejection.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Rejected(self))
        }
    }
}

impl IntoIterator for FieldErrors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Field errors of one row of a view import (rows are numbered from 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowErrors {
    pub row: usize,
    pub errors: FieldErrors,
}

fn format_rows(rows: &[RowErrors]) -> String {
    rows.iter()
        .map(|r| format!("row {}: {}", r.row, r.errors))
        .collect::<Vec<_>>()
        .join("; ")
}

// Blanket From impls for redb error types
impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Database(e.to_string())
    }
}
