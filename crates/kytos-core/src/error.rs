//! Optimizer error types.

use thiserror::Error;

/// Result type alias for solve operations.
pub type OptimizeResult<T> = Result<T, OptimizeError>;

/// Errors that abort a solve call.
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// The request cannot be solved as submitted. Raised before solving.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No annealing read ended in a constraint-satisfying assignment.
    #[error(
        "no feasible assignment found after {num_reads} reads; \
         relax constraint weights or increase num_reads or capacity"
    )]
    Infeasible { num_reads: u32 },
}

impl OptimizeError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizeError::InvalidInput(_) => "invalid_input",
            OptimizeError::Infeasible { .. } => "infeasible",
        }
    }
}
