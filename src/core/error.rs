use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("numeric fault at age {age:.1}: {detail}")]
    NumericFault { age: f64, detail: String },

    #[error("run count must be > 0")]
    EmptyBatch,
}

pub type EngineResult<T> = Result<T, EngineError>;

pub(crate) fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidPlan(msg.into())
}
