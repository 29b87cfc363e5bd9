//! Error types for dcgen
//!
//! Two families share one enum: transform-time errors (spec validation,
//! structural conflicts) and construction-time errors raised by generated
//! `__init__` code against the end caller of the generated class. The core
//! never catches its own errors; the surrounding front end decides whether
//! to propagate or log.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// dcgen errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed field or class spec (bad identifier, mutable default,
    /// order-without-eq, class-var with kw-only). Fatal to the transform.
    #[error("Spec error: {0}")]
    Spec(String),

    /// Structural conflict during processing (duplicate KW_ONLY marker,
    /// field attribute without annotation, frozen-inheritance violation).
    #[error("Type error: {0}")]
    Type(String),

    #[error("Cannot overwrite attribute {name} in class {class}")]
    CannotOverwrite { class: String, name: String },

    #[error("cannot assign to field {field:?}")]
    FrozenInstance { field: String },

    #[error("cannot delete field {field:?}")]
    FrozenDelete { field: String },

    #[error("{class} has no attribute {name:?}")]
    Attribute { class: String, name: String },

    /// Generated `__init__` type check failed for a field value.
    #[error("Field {field:?} of {class} expected {expected}, got {value}")]
    FieldType {
        class: String,
        field: String,
        expected: String,
        value: String,
    },

    /// Generated `__init__` per-field validator rejected a value.
    #[error("Field {field:?} of {class} failed validation with value {value}")]
    FieldValidate {
        class: String,
        field: String,
        value: String,
    },

    /// Generated `__init__` whole-object validator returned false.
    #[error("Validation of {class} failed in {fn_name}")]
    Validate { class: String, fn_name: String },

    #[error("Call error: {0}")]
    Call(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_norway::Error> for Error {
    fn from(e: serde_norway::Error) -> Self {
        Error::Yaml(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
