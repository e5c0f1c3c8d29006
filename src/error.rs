use std::sync::Arc;

use thiserror::Error;

use crate::value::ValueKind;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by configuration assembly, context building and the background data system.
///
/// Flag evaluation never returns an `Error`: evaluation problems are folded into the fallback value
/// and an [`ErrorKind`](crate::ErrorKind) inside the evaluation detail.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A configuration node that must be a mapping is something else.
    #[error("configuration at {} must be a table", display_path(.path))]
    SchemaType {
        /// Dotted path of the offending node (empty for the root).
        path: String,
    },

    /// Configuration contains a key that the schema does not know about.
    #[error("unrecognized field '{field}' in {}", display_path(.path))]
    UnrecognizedField {
        /// The unknown key.
        field: String,
        /// Dotted path of the table containing the key (empty for the root).
        path: String,
    },

    /// Configuration value has the wrong type.
    #[error("field '{path}' must be {expected}")]
    FieldType {
        /// Dotted path of the field.
        path: String,
        /// Human-readable name of the expected kind.
        expected: &'static str,
    },

    /// A negative number was supplied for an unsigned field.
    #[error("field '{path}' must not be negative (got {value})")]
    NegativeValue {
        /// Dotted path of the field.
        path: String,
        /// The rejected value.
        value: f64,
    },

    /// A string field only accepts a fixed vocabulary.
    #[error("field '{path}' has invalid value '{value}' (expected one of: {})", .allowed.join(", "))]
    InvalidChoice {
        /// Dotted path of the field.
        path: String,
        /// The rejected value.
        value: String,
        /// Accepted values.
        allowed: &'static [&'static str],
    },

    /// Two mutually exclusive configuration variants were supplied.
    #[error("'{first}' and '{second}' are mutually exclusive")]
    MutuallyExclusiveFields {
        /// Variant applied first.
        first: String,
        /// Variant applied second.
        second: String,
    },

    /// Configuration could not be sealed.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// The kind was already added to this context builder.
    #[error("context kind '{kind}' was already added")]
    DuplicateKind {
        #[allow(missing_docs)]
        kind: String,
    },

    /// A context kind was added with an empty key.
    #[error("context kind '{kind}' requires a non-empty key")]
    EmptyKey {
        #[allow(missing_docs)]
        kind: String,
    },

    /// Attempt to modify a kind that was never added to the builder.
    #[error("context kind '{kind}' was not added")]
    UnknownKind {
        #[allow(missing_docs)]
        kind: String,
    },

    /// A built-in context attribute (`key`, `kind`, `name`, `anonymous`, `_meta`) was set with an
    /// unsuitable value.
    #[error("cannot set built-in attribute '{attribute}' of context kind '{kind}' this way")]
    InvalidBuiltInAttribute {
        #[allow(missing_docs)]
        kind: String,
        #[allow(missing_docs)]
        attribute: String,
    },

    /// A context tree could not be interpreted.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Typed extraction from a [`Value`](crate::Value) failed.
    #[error("expected {expected} value, found {found}")]
    ValueType {
        #[allow(missing_docs)]
        expected: ValueKind,
        #[allow(missing_docs)]
        found: ValueKind,
    },

    /// The SDK key was rejected by the service.
    #[error("unauthorized, sdk_key is likely invalid")]
    Unauthorized,

    /// The service sent a payload that could not be interpreted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A persistent store used for lazy loading failed.
    #[error("persistent store unavailable: {0}")]
    StoreUnavailable(String),

    /// A background thread panicked. This should normally never happen.
    #[error("data system thread panicked")]
    DataSystemThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "top level".to_owned()
    } else {
        format!("'{path}'")
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
