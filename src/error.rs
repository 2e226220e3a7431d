use std::fmt;

/// Error type for the persistence framework, carrying the three kinds named
/// in the error-handling design: driver-side storage failures, programmer
/// mapping errors, and optional operations a driver/dialect doesn't support.
#[derive(Debug)]
pub enum Error {
    /// Any driver-side failure: connect, prepare, execute, commit, rollback,
    /// metadata. Always carries the originating message as cause.
    Storage {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// Programmer errors: unknown storage key, no mapping for a type, no id
    /// attribute for an update, unsupported predicate shape, value
    /// type-mismatch after conversion, unmappable datatype, missing parent
    /// attribute in a child query.
    Mapping(String),
    /// An optional operation the current driver/dialect does not support
    /// (positioning on a forward-only cursor, row-number on a dialect
    /// without window functions). Callers may treat this as non-fatal.
    Unsupported(String),
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Error::Mapping(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(message.into())
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Storage { message, .. } => write!(f, "storage error: {message}"),
            Error::Mapping(msg) => write!(f, "mapping error: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::storage_with_source("I/O error", err)
    }
}

/// Result type for the persistence framework.
pub type Result<T> = std::result::Result<T, Error>;
