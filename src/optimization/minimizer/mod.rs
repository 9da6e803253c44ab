//! minimizer — argmin-powered quasi-Newton solver for empirical moment losses.
//!
//! Purpose
//! -------
//! Provide a high-level, Argmin-backed optimization layer for **minimizing
//! moment losses** `L(θ)` arising from conditional moment restrictions.
//! Callers implement a single trait, [`MomentLoss`], and invoke [`minimize`]
//! to run L-BFGS with a configurable line search, tolerances, and
//! finite-difference fallbacks.
//!
//! Key behaviors
//! -------------
//! - Expose user-supplied losses to Argmin via [`adapter::ArgMinAdapter`],
//!   with no sign conversion anywhere.
//! - Expose a single, user-facing entrypoint [`minimize`] that:
//!   - validates the initial guess with [`MomentLoss::check`],
//!   - selects an L-BFGS solver via [`builders`] based on
//!     [`traits::LineSearcher`],
//!   - executes the solver via [`run::run_lbfgs`], and
//!   - normalizes results into an [`OptimOutcome`].
//! - Fall back to robust finite differences (central, then forward) when
//!   analytic gradients are missing, with post-hoc validation and error
//!   capture.
//! - Centralize optimizer configuration ([`Tolerances`], [`SolveOptions`])
//!   and validation logic ([`validation`]) so downstream code can assume
//!   sane, finite inputs.
//!
//! Invariants & assumptions
//! ------------------------
//! - The optimizer **always minimizes** the loss `L(θ)` directly; estimator
//!   code must phrase its objective as a loss, never as something to
//!   maximize.
//! - [`MomentLoss::value`] and [`MomentLoss::grad`] must treat invalid
//!   inputs as recoverable [`OptError`] values, not panics.
//! - Vectors use the canonical aliases [`Theta`] and [`Grad`]; all are
//!   assumed finite whenever optimization proceeds.
//! - Configuration types are validated on construction and treated as
//!   internally consistent by the solver layer.
//!
//! Conventions
//! -----------
//! - Parameters live in an unconstrained optimizer space as [`Theta`]
//!   (`Array1<f64>`). Critics own the mapping from θ to their internal
//!   weight layout.
//! - Errors bubble up as [`OptResult<T>`] / [`OptError`]; this module and
//!   its children never intentionally panic or use `unsafe`.
//!
//! Downstream usage
//! ----------------
//! - Estimator code implements [`MomentLoss`] for its stage losses, then
//!   calls [`minimize`] with a loss instance, an initial [`Theta`], a data
//!   payload, and a [`SolveOptions`] configuration.
//!
//! Testing notes
//! -------------
//! - Unit tests in submodules cover gradient pass-through and FD fallback
//!   in [`adapter`], solver construction in [`builders`], validation rules
//!   in [`validation`] and [`traits`], and small end-to-end solves in
//!   [`api`].

pub mod adapter;
pub mod api;
pub mod builders;
pub mod run;
pub mod traits;
pub mod types;
pub mod validation;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::api::minimize;
pub use self::traits::{LineSearcher, MomentLoss, OptimOutcome, SolveOptions, Tolerances};
pub use self::types::{Cost, DEFAULT_LBFGS_MEM, FnEvalMap, Grad, Theta};

// ---- Optional convenience prelude for downstream crates -------------------
//
// Downstream crates can write
//
//     use pci_nuisance::optimization::minimizer::prelude::*;
//
// to import the main optimizer surface in a single line.

pub mod prelude {
    pub use super::api::minimize;
    pub use super::traits::{LineSearcher, MomentLoss, OptimOutcome, SolveOptions, Tolerances};
    pub use super::types::{Cost, Grad, Theta};
}
