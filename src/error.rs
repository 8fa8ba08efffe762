use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {required} bars of history required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("constraint violation on {parameter}: {message}")]
    ConstraintViolation { parameter: String, message: String },

    #[error("numeric anomaly: {0}")]
    NumericAnomaly(String),

    /// A run observer stopped the simulation; no partial result is produced.
    #[error("run halted by observer at bar {bar}")]
    Halted { bar: usize },
}

impl BacktestError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn constraint<P: Into<String>, M: Into<String>>(parameter: P, message: M) -> Self {
        Self::ConstraintViolation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

pub type BacktestResult<T> = std::result::Result<T, BacktestError>;
