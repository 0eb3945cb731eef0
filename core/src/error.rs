use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{operation} failed for '{entity_id}': {source}")]
    Operation {
        operation: &'static str,
        entity_id: String,
        #[source]
        source: Box<LedgerError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Transport-independent error classes the API layer maps to outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status code for this class.
    pub fn status_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Validation => 400,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Classify the error, looking through operation context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Operation { source, .. } => source.kind(),
            Self::Database(_) | Self::Serialization(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Attach the failing operation and entity id. Already-wrapped errors
    /// keep their innermost context.
    pub fn in_operation(self, operation: &'static str, entity_id: &str) -> Self {
        match self {
            wrapped @ Self::Operation { .. } => wrapped,
            other => Self::Operation {
                operation,
                entity_id: entity_id.to_string(),
                source: Box::new(other),
            },
        }
    }
}

// Uniqueness, CHECK and guard-trigger violations are state conflicts;
// everything else the driver reports is internal.
impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
                Self::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => Self::Database(err),
        }
    }
}
