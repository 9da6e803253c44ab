/// Result alias for dataset construction and access.
pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug, Clone, PartialEq)]
pub enum DataError {
    /// Batches must contain at least one trajectory.
    EmptyBatch,

    /// All per-stage field vectors must cover the same horizon.
    HorizonMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    /// All columns of a stage must have the same number of trajectories.
    LengthMismatch {
        field: &'static str,
        stage: usize,
        expected: usize,
        found: usize,
    },

    /// Float columns must be finite.
    NonFiniteValue {
        field: &'static str,
        stage: usize,
        index: usize,
        value: f64,
    },

    /// Action codes must lie in `0..num_a`.
    ActionOutOfRange {
        stage: usize,
        index: usize,
        action: usize,
        num_a: usize,
    },

    /// Stage index must lie in `0..horizon`.
    StageOutOfRange {
        stage: usize,
        horizon: usize,
    },

    /// The action space must be non-empty.
    InvalidNumActions {
        num_a: usize,
    },
}

impl std::error::Error for DataError {}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::EmptyBatch => {
                write!(f, "Batch must contain at least one trajectory")
            }
            DataError::HorizonMismatch { field, expected, found } => {
                write!(f, "Horizon mismatch for field '{field}': expected {expected}, found {found}")
            }
            DataError::LengthMismatch { field, stage, expected, found } => {
                write!(
                    f,
                    "Length mismatch for field '{field}' at stage {stage}: expected {expected}, found {found}"
                )
            }
            DataError::NonFiniteValue { field, stage, index, value } => {
                write!(
                    f,
                    "Non-finite value in field '{field}' at stage {stage}, index {index}: {value}"
                )
            }
            DataError::ActionOutOfRange { stage, index, action, num_a } => {
                write!(
                    f,
                    "Action {action} at stage {stage}, index {index} is out of range for {num_a} actions"
                )
            }
            DataError::StageOutOfRange { stage, horizon } => {
                write!(f, "Stage {stage} is out of range for horizon {horizon}")
            }
            DataError::InvalidNumActions { num_a } => {
                write!(f, "Invalid number of actions: {num_a}, must be at least 1")
            }
        }
    }
}
