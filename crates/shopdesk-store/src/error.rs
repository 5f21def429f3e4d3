use rusqlite::ErrorCode;

use crate::query::FilterError;

const DUPLICATE_KEY_FALLBACK: &str = "Key already exists";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed filter: {0}")]
    MalformedFilter(#[from] FilterError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Classify a failed INSERT/UPDATE/DELETE. Uniqueness violations become
    /// `DuplicateKey` carrying SQLite's constraint message; foreign key
    /// violations become `Conflict`; NOT NULL and CHECK violations are
    /// `InvalidInput`.
    pub fn from_write(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, msg) = &e {
            if err.code == ErrorCode::ConstraintViolation {
                match err.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        return StoreError::DuplicateKey(
                            msg.clone().unwrap_or_else(|| DUPLICATE_KEY_FALLBACK.to_string()),
                        );
                    }
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        return StoreError::Conflict(
                            msg.clone().unwrap_or_else(|| "foreign key constraint failed".to_string()),
                        );
                    }
                    rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL
                    | rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                        return StoreError::InvalidInput(
                            msg.clone().unwrap_or_else(|| "constraint failed".to_string()),
                        );
                    }
                    _ => {}
                }
            }
        }
        StoreError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
