use crate::data::errors::DataError;
use crate::dedup::DedupError;
use crate::kernels::errors::KernelError;
use crate::optimization::errors::OptError;

/// Result alias for estimator operations.
pub type EstimResult<T> = Result<T, EstimError>;

#[derive(Debug, Clone, PartialEq)]
pub enum EstimError {
    /// Tabular estimators require integer-valued, finite proxy levels.
    NonDiscreteProxy {
        field: &'static str,
        index: usize,
        value: f64,
    },

    /// The ridge-escalation retry loop ran out of attempts.
    RetryExhausted {
        attempts: usize,
        last_alpha: f64,
    },

    /// A linear system could not be solved or inverted.
    SingularSystem {
        what: &'static str,
    },

    /// A fitted quantity came out non-finite or degenerate.
    NonFiniteFit {
        what: &'static str,
    },

    /// Stages must contain at least one observation.
    EmptyStage,

    /// Dataset horizon does not match the estimator configuration.
    HorizonMismatch {
        expected: usize,
        found: usize,
    },

    /// Weight/column lengths disagree with the stage size.
    StageLengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Orchestrator or trainer configuration is out of range.
    InvalidConfig {
        what: &'static str,
    },

    // ---- Wrapped lower layers ----
    Kernel(KernelError),
    Opt(OptError),
    Data(DataError),
    Dedup(DedupError),
}

impl std::error::Error for EstimError {}

impl std::fmt::Display for EstimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimError::NonDiscreteProxy { field, index, value } => {
                write!(
                    f,
                    "Non-discrete proxy in field '{field}' at index {index}: {value}, must be an integer-valued float"
                )
            }
            EstimError::RetryExhausted { attempts, last_alpha } => {
                write!(
                    f,
                    "Ridge escalation exhausted after {attempts} attempts (last alpha {last_alpha:e})"
                )
            }
            EstimError::SingularSystem { what } => {
                write!(f, "Singular linear system: {what}")
            }
            EstimError::NonFiniteFit { what } => {
                write!(f, "Non-finite fit: {what}")
            }
            EstimError::EmptyStage => {
                write!(f, "Stage must contain at least one observation")
            }
            EstimError::HorizonMismatch { expected, found } => {
                write!(f, "Horizon mismatch: estimator configured for {expected}, dataset has {found}")
            }
            EstimError::StageLengthMismatch { what, expected, found } => {
                write!(f, "Stage length mismatch for {what}: expected {expected}, found {found}")
            }
            EstimError::InvalidConfig { what } => {
                write!(f, "Invalid configuration: {what}")
            }
            EstimError::Kernel(e) => write!(f, "Kernel error: {e}"),
            EstimError::Opt(e) => write!(f, "Optimizer error: {e}"),
            EstimError::Data(e) => write!(f, "Data error: {e}"),
            EstimError::Dedup(e) => write!(f, "Dedup error: {e}"),
        }
    }
}

impl From<KernelError> for EstimError {
    fn from(e: KernelError) -> Self {
        EstimError::Kernel(e)
    }
}

impl From<OptError> for EstimError {
    fn from(e: OptError) -> Self {
        EstimError::Opt(e)
    }
}

impl From<DataError> for EstimError {
    fn from(e: DataError) -> Self {
        EstimError::Data(e)
    }
}

impl From<DedupError> for EstimError {
    fn from(e: DedupError) -> Self {
        EstimError::Dedup(e)
    }
}
