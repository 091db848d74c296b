use fortify_common::types::TransitionError;

/// Domain failures raised by the store.
///
/// Store methods return `anyhow::Result`; callers that need to tell these
/// apart downcast the error, e.g. to pick an HTTP status.
///
/// ```rust
/// use fortify_storage::error::StorageError;
///
/// let err: anyhow::Error = StorageError::NotFound {
///     entity: "mill",
///     id: "m-1".to_string(),
/// }
/// .into();
/// assert!(matches!(
///     err.downcast_ref::<StorageError>(),
///     Some(StorageError::NotFound { .. })
/// ));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A status change outside the entity's transition table.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The record exists but is in a state that forbids the operation.
    #[error("{0}")]
    InvalidState(String),

    /// Duplicate of something that may only exist once.
    #[error("{0}")]
    Conflict(String),

    /// Certificate requested for an audit that does not qualify.
    #[error("{0}")]
    NotEligible(String),

    /// A column held a value the record type cannot represent.
    #[error("invalid value '{value}' in column '{column}'")]
    InvalidColumn { column: &'static str, value: String },

    #[error("JSON error in column '{column}': {source}")]
    Json {
        column: &'static str,
        source: serde_json::Error,
    },
}
