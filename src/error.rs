//! Error types for the type-modeling core.
//!
//! A single thiserror enum covers the three failure classes of the crate:
//! rejected arguments, persistence failures reported by a backend, and
//! lookups of ids that are not part of the in-memory universe.

use thiserror::Error;

use crate::types::ids::{InstanceId, MemberId, SectionId, TypeId};

/// Main error type for type system operations.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Missing or structurally impossible argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A member declaration that would make a type contain itself
    #[error("Cyclic declaration: {member} can not become a member of {parent}")]
    CyclicDeclaration { parent: TypeId, member: TypeId },

    /// Backend failed to store data
    #[error("Couldn't save data: {0}")]
    CouldntSave(String),

    /// Backend failed to load data
    #[error("Couldn't load data: {0}")]
    CouldntLoad(String),

    /// Backend failed to delete data
    #[error("Couldn't delete data: {0}")]
    CouldntDelete(String),

    #[error("Unknown base type: {0}")]
    TypeNotFound(TypeId),

    #[error("Unknown type member: {0}")]
    MemberNotFound(MemberId),

    #[error("Unknown section: {0}")]
    SectionNotFound(SectionId),

    #[error("Unknown type instance: {0}")]
    InstanceNotFound(InstanceId),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TypesError {
    /// Shorthand for building an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        TypesError::InvalidArgument(message.into())
    }

    /// True if the error was reported by a persistence backend.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            TypesError::CouldntSave(_) | TypesError::CouldntLoad(_) | TypesError::CouldntDelete(_)
        )
    }

    /// True if the error refers to an id unknown to the in-memory state.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TypesError::TypeNotFound(_)
                | TypesError::MemberNotFound(_)
                | TypesError::SectionNotFound(_)
                | TypesError::InstanceNotFound(_)
        )
    }
}

/// Result type alias for type system operations
pub type Result<T> = std::result::Result<T, TypesError>;

/// Convert type system errors to PyO3 exceptions
#[cfg(feature = "python-ext")]
impl From<TypesError> for pyo3::PyErr {
    fn from(err: TypesError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyException, PyIOError, PyKeyError, PyValueError};

        match err {
            TypesError::Io(e) => PyIOError::new_err(e.to_string()),
            TypesError::InvalidArgument(msg) => PyValueError::new_err(msg),
            e @ TypesError::CyclicDeclaration { .. } => PyValueError::new_err(e.to_string()),
            e if e.is_not_found() => PyKeyError::new_err(e.to_string()),
            _ => PyException::new_err(err.to_string()),
        }
    }
}
