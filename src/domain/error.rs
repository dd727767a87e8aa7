//! Adapter error types with proper error chaining.

use serde::Serialize;
use thiserror::Error;

use super::types::Oid;

/// A server-reported SQL error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostgresError {
    pub code: String,
    pub severity: String,
    pub message: String,
    pub detail: Option<String>,
    pub column: Option<String>,
    pub hint: Option<String>,
}

/// Classified data errors. Returned to callers, never raised as defects.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ErrorKind {
    #[error("{} ({}): {}", .0.severity, .0.code, .0.message)]
    Postgres(PostgresError),
    #[error("Unsupported column type {type_name} (OID={oid})")]
    UnsupportedNativeDataType { type_name: String, oid: Oid },
    #[error("Invalid type id: {oid}")]
    InvalidTypeId { oid: Oid },
    #[error("Transactions are not supported in HTTP mode")]
    TransactionsNotSupported,
}

/// Server error fields as exposed by an underlying client.
///
/// Every field is optional: a failure only counts as a server error once
/// `code`, `severity` and `message` are all present.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct RawServerError {
    pub code: Option<String>,
    pub severity: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub column: Option<String>,
    pub hint: Option<String>,
}

impl RawServerError {
    /// Returns the classified error when the server error shape is complete.
    pub fn to_postgres_error(&self) -> Option<PostgresError> {
        Some(PostgresError {
            code: self.code.clone()?,
            severity: self.severity.clone()?,
            message: self.message.clone()?,
            detail: self.detail.clone(),
            column: self.column.clone(),
            hint: self.hint.clone(),
        })
    }
}

/// Unclassified failure raised by an underlying client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Database error: {}", .0.message.as_deref().unwrap_or("unknown"))]
    Database(RawServerError),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

impl DriverError {
    pub fn server(code: &str, severity: &str, message: &str) -> Self {
        DriverError::Database(RawServerError {
            code: Some(code.to_string()),
            severity: Some(severity.to_string()),
            message: Some(message.to_string()),
            ..RawServerError::default()
        })
    }
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::ParseError(s.to_string())
    }
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(err: validator::ValidationErrors) -> Self {
        ConfigError::InvalidValue {
            key: "connection".to_string(),
            message: err.to_string(),
        }
    }
}

/// Error returned by every adapter operation.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error(transparent)]
    Kind(#[from] ErrorKind),
    /// A failure that did not match any known data-error shape.
    #[error("Driver failure: {0}")]
    Driver(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AdapterError {
    /// The classified data error, if this is one.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            AdapterError::Kind(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_data_error(&self) -> bool {
        self.kind().is_some()
    }
}
