//! Error types for the progression engine

/// Errors raised by step transitions and the persistence coordinator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressionError {
    #[error("No workflow loaded")]
    NoWorkflowLoaded,

    #[error("Cannot skip required step: {0}")]
    CannotSkipRequiredStep(String),

    #[error("Invalid navigation target: {0}")]
    InvalidNavigationTarget(String),

    #[error("Step {step_id} does not exist in preset {preset_id}")]
    UnknownStep { preset_id: String, step_id: String },

    #[error("Instance follows preset {expected} but preset {found} was supplied")]
    PresetMismatch { expected: String, found: String },

    #[error("Workflow instance {0} has been abandoned")]
    WorkflowAbandoned(String),

    #[error("Preset {0} has no steps")]
    EmptyDefinition(String),

    #[error("Durable write failed: {0}")]
    DurableWriteFailed(String),

    #[error("Ephemeral write failed: {0}")]
    EphemeralWriteFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProgressionError {
    /// Whether the error was caused by the caller (bad action or missing load)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProgressionError::NoWorkflowLoaded
                | ProgressionError::CannotSkipRequiredStep(_)
                | ProgressionError::InvalidNavigationTarget(_)
                | ProgressionError::UnknownStep { .. }
                | ProgressionError::PresetMismatch { .. }
                | ProgressionError::WorkflowAbandoned(_)
                | ProgressionError::EmptyDefinition(_)
        )
    }
}

/// Errors reported by the durable store and the ephemeral cache
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Workflow instance not found: {owner_id}/{instance_id}")]
    NotFound {
        owner_id: String,
        instance_id: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Preset loading errors
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid preset {preset_id}: {reason}")]
    Invalid { preset_id: String, reason: String },

    #[error("Preset not found: {0}")]
    NotFound(String),
}
