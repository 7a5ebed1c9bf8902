use std::time::Duration;

/// Result alias used across the orchestration crates.
pub type Result<T> = std::result::Result<T, ConductorError>;

/// Errors surfaced by the orchestration core.
///
/// Load-time errors (`InvalidConfig`) are fatal. Lookup and resolution errors
/// are returned before anything is dispatched. Dispatch errors halt the run
/// they occur in and are otherwise captured in its `MacroRun`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConductorError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("unknown macro: {0}")]
    UnknownMacro(String),

    #[error("step {step_index}: unresolved parameter '{source_name}'")]
    UnresolvedParameter {
        step_index: usize,
        source_name: String,
    },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("dispatch timed out after {0:?}")]
    DispatchTimeout(Duration),

    #[error("dispatch failed: {0}")]
    DispatchError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    /// Short classification string for logging and RPC error codes.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::UnknownModule(_) => "unknown_module",
            Self::UnknownMacro(_) => "unknown_macro",
            Self::UnresolvedParameter { .. } => "unresolved_parameter",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::DispatchTimeout(_) => "dispatch_timeout",
            Self::DispatchError(_) => "dispatch_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Errors raised before any command leaves the process.
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            Self::UnknownMacro(_) | Self::UnresolvedParameter { .. } | Self::InvalidParameter { .. }
        )
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Failure of a single round trip to a module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchFailure {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The module answered with an explicit error status.
    #[error("module rejected command: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The module answered with something that is not a response payload.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<DispatchFailure> for ConductorError {
    fn from(failure: DispatchFailure) -> Self {
        match failure {
            DispatchFailure::Timeout(after) => Self::DispatchTimeout(after),
            other => Self::DispatchError(other.to_string()),
        }
    }
}
