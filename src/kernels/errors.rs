/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// `gram` was called before `tune`.
    NotTuned,

    /// Tuning samples must contain at least one row.
    EmptySample,

    /// Row and column points must share the embedded dimension.
    DimMismatch {
        rows_dim: usize,
        cols_dim: usize,
    },

    /// Tuned bandwidths must be finite and strictly positive.
    InvalidBandwidth {
        value: f64,
    },
}

impl std::error::Error for KernelError {}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::NotTuned => {
                write!(f, "Kernel must be tuned before computing Gram matrices")
            }
            KernelError::EmptySample => {
                write!(f, "Tuning sample must contain at least one row")
            }
            KernelError::DimMismatch { rows_dim, cols_dim } => {
                write!(f, "Embedded dimension mismatch: rows {rows_dim}, cols {cols_dim}")
            }
            KernelError::InvalidBandwidth { value } => {
                write!(f, "Invalid bandwidth {value}: must be finite and positive")
            }
        }
    }
}
