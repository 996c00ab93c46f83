pub mod store;
pub mod value;

use thiserror::Error;

pub use store::{SQLStore, SqliteStore};
pub use value::{Row, Value};

/// Errors from the SQL layer.
#[derive(Error, Debug)]
pub enum SQLError {
    #[error("query error: {0}")]
    Query(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl SQLError {
    /// Whether this error was caused by a uniqueness-constraint violation.
    ///
    /// Used by callers that retry on key collisions (e.g. accession number
    /// allocation races).
    pub fn is_unique_violation(&self) -> bool {
        match self {
            SQLError::Query(msg) | SQLError::Execution(msg) => {
                msg.contains("UNIQUE constraint")
            }
            SQLError::Connection(_) => false,
        }
    }
}
