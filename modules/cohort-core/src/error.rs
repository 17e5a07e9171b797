//! Typed errors for validation, configuration and per-event replication.

use thiserror::Error;

/// A reference instance header failed structural or provenance checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{method}: {param} has no instance GUID")]
    MissingGuid { method: String, param: String },

    #[error("{method}: {param} for instance {guid} has no type")]
    MissingType {
        method: String,
        param: String,
        guid: String,
    },

    #[error("{method}: {param} for instance {guid} has an incomplete type ({detail})")]
    IncompleteType {
        method: String,
        param: String,
        guid: String,
        detail: &'static str,
    },

    #[error("{method}: {param} for instance {guid} has no home metadata collection")]
    MissingHome {
        method: String,
        param: String,
        guid: String,
    },

    /// The instance is homed here, so it can never be a reference copy.
    #[error("{method}: instance {guid} is homed in local collection {collection_id} on {repository}")]
    LocallyHomed {
        method: String,
        repository: String,
        guid: String,
        collection_id: String,
    },

    #[error("{method}: {param} for instance {guid} has unknown provenance")]
    UnknownProvenance {
        method: String,
        param: String,
        guid: String,
    },

    #[error("{method}: {param} for instance {guid} has invalid version {version}")]
    InvalidVersion {
        method: String,
        param: String,
        guid: String,
        version: u64,
    },
}

/// The process is mis-wired. Every event would fail the same way, so this is
/// raised when the engine is built rather than per event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A failure while handling a single event. Audited and dropped; never
/// propagated to the transport.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("store error during {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ReplicationError {
    pub fn store(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Store { operation, source }
    }
}

/// Result type alias for per-event replication steps.
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;
