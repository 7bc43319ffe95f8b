use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Lazy access to '{entity}.{attribute}' after the unit of work ended")]
    DetachedLazyAccess { entity: String, attribute: String },

    #[error("Inconsistent fetch group: {0}")]
    InconsistentFetchGroup(String),

    #[error("Identity mismatch for '{entity}': expected {expected}, fetched {actual}")]
    IdentityMismatch {
        entity: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Entity type '{0}' not found")]
    EntityTypeNotFound(String),

    #[error("Attribute '{0}' not found on entity '{1}'")]
    AttributeNotFound(String, String),

    #[error("Entity '{entity}' with identity {identity} not found")]
    EntityNotFound { entity: String, identity: String },

    #[error("Fetch of group '{group}' for '{entity}' did not return attribute '{attribute}'")]
    IncompleteFetch {
        entity: String,
        group: String,
        attribute: String,
    },

    #[error("Entity '{entity}' with identity {identity} was removed")]
    EntityRemoved { entity: String, identity: String },

    #[error("Identity attribute of '{0}' is immutable")]
    ImmutableIdentity(String),

    #[error("Cannot resolve the identity of detached '{0}'")]
    UnresolvableIdentity(String),

    #[error("Entity reference {0} is not managed by this unit of work")]
    UnknownEntityRef(String),

    #[error("Unit of work is closed")]
    SessionClosed,

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lifecycle callback '{callback}' failed: {message}")]
    CallbackFailed { callback: String, message: String },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl OrmError {
    /// Errors that indicate broken metadata or corrupted data rather than a
    /// recoverable runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InconsistentFetchGroup(_) | Self::IdentityMismatch { .. } | Self::InvalidMapping(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl<T> From<std::sync::PoisonError<T>> for OrmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for OrmError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for OrmError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OrmError::InconsistentFetchGroup("overlap".into()).is_fatal());
        assert!(
            OrmError::IdentityMismatch {
                entity: "Customer".into(),
                expected: "1".into(),
                actual: "2".into(),
            }
            .is_fatal()
        );
        assert!(!OrmError::SessionClosed.is_fatal());
    }

    #[test]
    fn test_detached_message_names_attribute() {
        let err = OrmError::DetachedLazyAccess {
            entity: "SupplementalInfo".into(),
            attribute: "something".into(),
        };
        assert!(err.to_string().contains("SupplementalInfo.something"));
    }
}
