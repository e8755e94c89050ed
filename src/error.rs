use thiserror::Error;

/// Errors surfaced by every planner operation.
///
/// All variants are local to one computation; the loaded tables are never
/// touched, so the caller can retry with corrected input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlannerError {
    /// Missing column, empty table, unparseable input.
    #[error("invalid input: {0}")]
    InputValidation(String),
    /// Not enough rows (or sites) to run the operation.
    #[error("insufficient data for {context}: need at least {required}, got {available}")]
    InsufficientData {
        context: String,
        required: usize,
        available: usize,
    },
    /// No usable coordinates left after filtering.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
