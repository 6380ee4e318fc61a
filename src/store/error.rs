//! Store Error Types

use std::fmt;

/// Kind of record an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Plugin,
    Schedule,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Plugin => write!(f, "plugin"),
            Entity::Schedule => write!(f, "schedule"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("No {entity} with id {id}")]
    NotFound { entity: Entity, id: i64 },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Storage backend failure: {message}")]
    Backend { message: String },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
