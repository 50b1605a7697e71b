use thiserror::Error;

/// Main error type for the SOT system
#[derive(Error, Debug)]
pub enum SotError {
    #[error("Corrupt checkpoint: {message}")]
    CorruptCheckpoint { message: String },

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SotError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        SotError::CorruptCheckpoint {
            message: message.into(),
        }
    }

    pub fn is_corrupt_checkpoint(&self) -> bool {
        matches!(self, SotError::CorruptCheckpoint { .. })
    }
}

/// Failure of a single objective evaluation.
///
/// These never abort a run; the control loop records them as a Failed
/// evaluation and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Evaluation failed: {message}")]
    Failed { message: String },

    #[error("Evaluation panicked: {message}")]
    Panicked { message: String },

    #[error("Evaluation timed out after {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },

    #[error("Evaluation returned a non-finite value: {value}")]
    NonFinite { value: f64 },

    #[error("Point has dimension {found}, objective expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl EvaluationError {
    pub fn failed(message: impl Into<String>) -> Self {
        EvaluationError::Failed {
            message: message.into(),
        }
    }
}

/// Strategy-related errors
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Invalid strategy configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Strategy state error: {message}")]
    InvalidState { message: String },

    #[error("Replay diverged at event {index}: {message}")]
    ReplayDivergence { index: usize, message: String },

    #[error("Strategy not started: call start(budget) first")]
    NotStarted,
}

/// Result type alias for SOT operations
pub type SotResult<T> = Result<T, SotError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::SotError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SotError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SotError::Config(format!($($arg)*))
    };
}
