//! Core error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from building, validating, and driving a state machine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown state: {state}")]
    UnknownState { state: String },

    #[error("state '{state}' belongs to a different machine")]
    ForeignState { state: String },

    #[error("unknown transition: {transition}")]
    UnknownTransition { transition: String },

    #[error("state '{parent}' cannot own child states")]
    InvalidParent { parent: String },

    #[error("state '{state}' cannot own transitions")]
    InvalidSource { state: String },

    #[error("the root state '{state}' cannot be a transition target")]
    RootTarget { state: String },

    #[error("the root state '{state}' cannot be removed")]
    RootRemoval { state: String },

    #[error("duplicate state name: {state}")]
    DuplicateState { state: String },

    #[error("initial state '{child}' is not a direct child of '{parent}'")]
    InvalidInitialState { parent: String, child: String },

    #[error("missing initial state in compound state '{state}'")]
    NoInitialState { state: String },

    #[error("state '{state}' is not a history state")]
    NotHistoryState { state: String },

    #[error("missing default state in history state '{history}'")]
    MissingHistoryDefault { history: String },

    #[error("default state '{target}' of history state '{history}' is not a descendant of '{parent}'")]
    InvalidHistoryDefault {
        history: String,
        parent: String,
        target: String,
    },

    #[error("transition from '{from_state}' has no target states")]
    NoTargets { from_state: String },

    #[error("transition from '{from_state}' targets removed state '{target}'")]
    DanglingTarget { from_state: String, target: String },

    #[error(
        "transition from '{from_state}' targets states that cannot be active together: '{first}' and '{second}'"
    )]
    ConflictingTargets {
        from_state: String,
        first: String,
        second: String,
    },

    #[error("error state '{target}' of '{state}' cannot be entered")]
    InvalidErrorState { state: String, target: String },

    #[error("state machine is running; stop it before changing the state tree")]
    MachineRunning,

    #[error("state machine is already running")]
    AlreadyRunning,

    #[error("state machine has finished; reset it before starting again")]
    AlreadyFinished,

    #[error("state machine is not running")]
    NotRunning,

    #[error("events must be processed on the thread that started the machine")]
    WrongThread,

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("invalid chart definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Returns whether this error describes a defect in the state tree itself,
    /// as opposed to misuse of the machine's lifecycle.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidParent { .. }
                | CoreError::InvalidSource { .. }
                | CoreError::RootTarget { .. }
                | CoreError::DuplicateState { .. }
                | CoreError::InvalidInitialState { .. }
                | CoreError::NoInitialState { .. }
                | CoreError::MissingHistoryDefault { .. }
                | CoreError::InvalidHistoryDefault { .. }
                | CoreError::NoTargets { .. }
                | CoreError::DanglingTarget { .. }
                | CoreError::ConflictingTargets { .. }
                | CoreError::InvalidErrorState { .. }
                | CoreError::ForeignState { .. }
                | CoreError::InvalidGuard { .. }
                | CoreError::InvalidDefinition { .. }
        )
    }

    /// Returns a stable error code suitable for tooling output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::ForeignState { .. } => "FOREIGN_STATE",
            CoreError::UnknownTransition { .. } => "UNKNOWN_TRANSITION",
            CoreError::InvalidParent { .. } => "INVALID_PARENT",
            CoreError::InvalidSource { .. } => "INVALID_SOURCE",
            CoreError::RootTarget { .. } => "ROOT_TARGET",
            CoreError::RootRemoval { .. } => "ROOT_REMOVAL",
            CoreError::DuplicateState { .. } => "DUPLICATE_STATE",
            CoreError::InvalidInitialState { .. } => "INVALID_INITIAL_STATE",
            CoreError::NoInitialState { .. } => "NO_INITIAL_STATE",
            CoreError::NotHistoryState { .. } => "NOT_HISTORY_STATE",
            CoreError::MissingHistoryDefault { .. } => "NO_DEFAULT_STATE_IN_HISTORY",
            CoreError::InvalidHistoryDefault { .. } => "INVALID_HISTORY_DEFAULT",
            CoreError::NoTargets { .. } => "NO_TARGETS",
            CoreError::DanglingTarget { .. } => "DANGLING_TARGET",
            CoreError::ConflictingTargets { .. } => "CONFLICTING_TARGETS",
            CoreError::InvalidErrorState { .. } => "INVALID_ERROR_STATE",
            CoreError::MachineRunning => "MACHINE_RUNNING",
            CoreError::AlreadyRunning => "ALREADY_RUNNING",
            CoreError::AlreadyFinished => "ALREADY_FINISHED",
            CoreError::NotRunning => "NOT_RUNNING",
            CoreError::WrongThread => "WRONG_THREAD",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::Io { .. } => "IO_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
            CoreError::Yaml(_) => "BAD_REQUEST",
        }
    }
}

/// Failure reported by an entry, exit, or transition hook.
///
/// Hook failures never abort a step; the machine records them as a
/// [`MachineFault`](crate::machine::MachineFault).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HookError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HookError {
    fn from(s: String) -> Self {
        Self(s)
    }
}
