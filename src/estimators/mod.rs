//! estimators — per-stage bridge-function fitting strategies.
//!
//! Purpose
//! -------
//! Implement the five estimation families behind the [`QEstimator`] and
//! [`HEstimator`] traits. Each consumes one stage snapshot plus the
//! threaded weights and targets, and returns a self-contained
//! [`NuisanceFn`]:
//!
//! - [`single_kernel`]: minimax fit of a parametric critic against a
//!   kernelized adversary, with alternation and ridge escalation.
//! - [`mmr`]: direct minimization of the RKHS moment norm, one convex
//!   quadratic per fit.
//! - [`discrete_mmr`]: the moment-norm fit over deduplicated tuples with
//!   a data-driven normalization of the fitted function. Also the
//!   pretraining stage of the joint game.
//! - [`discrete`]: penalized tabular least squares for integer proxy
//!   spaces, with an Adam fallback loop.
//! - [`double_kernel`]: closed-form RKHS fit against a kernelized
//!   adversary via regularized normal equations.
//!
//! Conventions
//! -----------
//! - Q fits read the future proxy `z` and test against past tuples; H fits
//!   read the past proxy `w` and test against future tuples.
//! - Every fit renormalizes its importance weights to mean one and reports
//!   numerical failures as [`errors::EstimError`] values.

pub mod discrete;
pub mod discrete_mmr;
pub mod double_kernel;
pub mod errors;
pub mod mmr;
pub mod single_kernel;
pub mod solve;
pub mod traits;

pub use self::discrete::{DiscreteConfig, DiscreteEstimator};
pub use self::discrete_mmr::{DiscreteMmrConfig, DiscreteMmrEstimator};
pub use self::double_kernel::{DoubleKernelConfig, DoubleKernelEstimator};
pub use self::errors::{EstimError, EstimResult};
pub use self::mmr::{MmrConfig, MmrEstimator};
pub use self::single_kernel::{SingleKernelConfig, SingleKernelEstimator};
pub use self::traits::{
    HEstimator, HStageInputs, NuisanceFn, ProxyField, QEstimator, TupleSet, normalize_mean_one,
};
