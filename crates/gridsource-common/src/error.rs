//! Error definitions for gridsource

use thiserror::Error;

/// Stable codes for store contract violations.
///
/// These are surfaced verbatim in error messages so hosts can match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The store omitted `totalCount` although the request asked for it.
    MissingTotalCount,
    /// The store omitted `groupCount` although the request asked for it.
    MissingGroupCount,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingTotalCount => "E4021",
            ErrorCode::MissingGroupCount => "E4022",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents errors that can occur while loading, grouping or paging data.
///
/// # Example
/// ```rust
/// use gridsource_common::GridError;
///
/// fn example() -> gridsource_common::Result<()> {
///     Err(GridError::Store("backend unavailable".into()))
/// }
///
/// match example() {
///     Ok(_) => println!("Success"),
///     Err(e) => println!("Error occurred: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{code}: {message}")]
    Contract { code: ErrorCode, message: String },
}

pub type Result<T> = std::result::Result<T, GridError>;

impl GridError {
    /// The store answered a request that required `totalCount` without one.
    pub fn missing_total_count() -> Self {
        GridError::Contract {
            code: ErrorCode::MissingTotalCount,
            message: "the store did not return totalCount although it was required".into(),
        }
    }

    /// The store answered a request that required `groupCount` without one.
    pub fn missing_group_count() -> Self {
        GridError::Contract {
            code: ErrorCode::MissingGroupCount,
            message: "the store did not return groupCount although it was required".into(),
        }
    }

    /// Get the inner message without the type prefix.
    pub fn message(&self) -> &str {
        match self {
            GridError::Io(msg) => msg,
            GridError::Store(msg) => msg,
            GridError::Parse(msg) => msg,
            GridError::InvalidOperation(msg) => msg,
            GridError::Config(msg) => msg,
            GridError::Contract { message, .. } => message,
        }
    }

    /// Get a short error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            GridError::Io(_) => "io_error",
            GridError::Store(_) => "store_error",
            GridError::Parse(_) => "parse_error",
            GridError::InvalidOperation(_) => "invalid_operation",
            GridError::Config(_) => "config_error",
            GridError::Contract { .. } => "contract_violation",
        }
    }

    /// The stable code of a contract violation, if this is one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            GridError::Contract { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Contract violations are hard failures and must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GridError::Contract { .. })
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for GridError {
    fn from(err: toml::de::Error) -> Self {
        GridError::Config(err.to_string())
    }
}
