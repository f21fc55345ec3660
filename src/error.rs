use thiserror::Error;

/// Typed failures surfaced through `anyhow::Error`. Callers that need to
/// branch on the category can `downcast_ref::<RecError>()`.
#[derive(Debug, Error)]
pub enum RecError {
    #[error("{source_name} line {line}: {reason}")]
    Parse {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("failed to load {resource}: {reason}")]
    Load { resource: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Precondition(String),

    #[error("training is already in progress")]
    TrainingInProgress,

    #[error("training was cancelled")]
    Cancelled,

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("index {index} out of range for table of {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("embedding projection failed: {0}")]
    Projection(String),
}

impl RecError {
    pub fn parse(source_name: &str, line: usize, reason: impl Into<String>) -> Self {
        RecError::Parse {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        RecError::Precondition(message.into())
    }

    pub fn shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        RecError::Shape {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Recoverable conditions the caller can retry after fixing state.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RecError::Precondition(_) | RecError::TrainingInProgress | RecError::Cancelled
        )
    }
}
