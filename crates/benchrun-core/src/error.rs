use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("not initialized: run 'benchrun init'")]
    NotInitialized,

    #[error("reagent '{pool}' exhausted: requested {requested} uL, {available} uL available")]
    ReagentExhausted {
        pool: String,
        requested: f64,
        available: f64,
    },

    #[error("invalid volume {volume} uL requested from reagent '{pool}'")]
    InvalidVolume { pool: String, volume: f64 },

    #[error("persisted state does not match pool definition for '{pool}': {reason}")]
    PersistedStateMismatch { pool: String, reason: String },

    #[error("resume point '{0}' was never reached during the run")]
    ResumePointNotReached(String),

    #[error("cannot pair {primary} with {secondary}: {reason}")]
    PairingUnavailable {
        primary: String,
        secondary: String,
        reason: String,
    },

    #[error("watchdog timeout: stage '{stage}' did not advance within {minutes} minutes")]
    WatchdogTimeout { stage: String, minutes: u64 },

    #[error("paired session has no recorded commands")]
    EmptyRecording,

    #[error("cannot resolve location '{0}'")]
    UnresolvedLocation(String),

    #[error("consumable pool not found: {0}")]
    UnknownPool(String),

    #[error("no consumable pool mapped to mount '{0}'")]
    UnknownMount(String),

    #[error("labware not found: {0}")]
    UnknownLabware(String),

    #[error("labware '{name}' has an invalid shape: {reason}")]
    InvalidLabware { name: String, reason: String },

    #[error("reagent not found: {0}")]
    UnknownReagent(String),

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens or underscores")]
    InvalidName(String),

    #[error("mount {mount} {reason}")]
    TipState { mount: String, reason: String },

    #[error("run aborted by operator: {0}")]
    OperatorAborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BenchError>;
