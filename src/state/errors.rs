use thiserror::Error;

/// Definition and bootstrap errors. These are fatal for the current
/// invocation: no machine is built and nothing runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("state name must not be empty")]
    EmptyStateName,

    #[error("state [{name}] was registered twice with different definitions")]
    ConflictingState { name: String },

    #[error("attempted to set the current state to [{name}], but it was not registered with the state machine")]
    UnregisteredState { name: String },

    #[error("invalid progress record: {0}")]
    InvalidProgressRecord(#[from] serde_json::Error),
}

/// Errors surfaced by a single tick. None of them are retried by the engine.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("error reconciling state [{state}]: {source}")]
    Action {
        state: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error determining if state [{state}] is complete: {source}")]
    CompletionCheck {
        state: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error saving next state [{next_state}] after completing [{state}]: {source}")]
    Persistence {
        state: String,
        next_state: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TickError {
    /// Name of the state that was active when the tick failed.
    pub fn state(&self) -> &str {
        match self {
            TickError::Action { state, .. }
            | TickError::CompletionCheck { state, .. }
            | TickError::Persistence { state, .. } => state,
        }
    }

    /// The collaborator's error, untouched.
    pub fn inner(&self) -> &anyhow::Error {
        match self {
            TickError::Action { source, .. }
            | TickError::CompletionCheck { source, .. }
            | TickError::Persistence { source, .. } => source,
        }
    }
}
