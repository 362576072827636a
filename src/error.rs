use thiserror::Error;

/// Failures raised by feature derivation, the pricing formulas and the fitter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PricingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown {kind} category: {value}")]
    UnknownCategory { kind: &'static str, value: String },
    #[error("non-finite result while computing {0}")]
    NumericDomain(&'static str),
    #[error("design matrix is singular ({rows} rows, {cols} columns, rank {rank})")]
    SingularMatrix { rows: usize, cols: usize, rank: usize },
    #[error("feature schema mismatch: expected {expected:?}, got {actual:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("no fitted regression model available")]
    ModelUnavailable,
    #[error("no valid readings in batch")]
    EmptyBatch,
    #[error("state lock poisoned")]
    StateLock,
}

/// Reject NaN and infinities before they leave a pricing call.
pub fn ensure_finite(value: f64, what: &'static str) -> Result<f64, PricingError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PricingError::NumericDomain(what))
    }
}
