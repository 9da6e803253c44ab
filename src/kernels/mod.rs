//! kernels — PSD kernels over embedded covariate rows.
//!
//! The adversarial function classes of the kernel-based estimators live in
//! RKHSs induced by these kernels. Each stage tunes a fresh kernel from a
//! representative sample (median heuristic) and evaluates Gram matrices
//! between observed and counterfactual row sets.

pub mod errors;
pub mod gaussian;

pub use self::errors::{KernelError, KernelResult};
pub use self::gaussian::{KernelKind, PsdKernel, RbfKernel, TripleMedianKernel, sq_cdist};
