//! optimization — moment-loss solvers and unified error surface.
//!
//! Purpose
//! -------
//! Provide a cohesive optimization layer for nuisance fitting, combining an
//! Argmin-backed quasi-Newton minimizer for empirical moment losses, simple
//! first-order updaters for adversarial training loops, and a single
//! error/result surface. Callers implement a loss, choose tolerances, and
//! obtain fitted parameters and diagnostics without touching backend solver
//! details.
//!
//! Key behaviors
//! -------------
//! - Expose a high-level API for **minimizing moment losses** `L(θ)`
//!   (`minimizer`), including configuration of solvers and stopping criteria.
//! - Supply stateful first-order updaters (`first_order`: Adam and its
//!   optimistic variant) for the discrete fallback loop and the joint
//!   adversarial game, where a full quasi-Newton solve is inappropriate.
//! - Normalize configuration issues, numerical failures, and backend solver
//!   errors into a single enum (`errors::OptError`) with a common result
//!   alias (`OptResult<T>`).
//!
//! Invariants & assumptions
//! ------------------------
//! - Optimizers operate in an unconstrained parameter space `θ` and assume
//!   that inputs are finite once validation has passed; invalid states are
//!   reported as `OptError`, not panics.
//! - Loss implementations are expected to treat domain violations (e.g.
//!   singular ridge systems, non-finite intermediate values) as recoverable
//!   errors surfaced through the optimization layer.
//!
//! Conventions
//! -----------
//! - Solvers minimize the loss directly; there is no internal sign flip.
//! - Parameters and gradients are represented using `ndarray`-based aliases
//!   (`Theta`, `Grad`); any mapping between θ and a critic's internal layout
//!   is handled by the critic itself.
//! - Public optimization entrypoints that can fail return `OptResult<T>`;
//!   callers never see raw Argmin errors.
//!
//! Downstream usage
//! ----------------
//! - Estimator code implements `MomentLoss` for its stage losses and calls
//!   `minimize` with a parameter guess, data payload, and `SolveOptions` to
//!   obtain an `OptimOutcome` (via `minimizer`).
//! - The discrete estimator's fallback loop and the joint game trainer drive
//!   `Adam`/`OAdam` steps directly against critic parameter vectors.
//!
//! Testing notes
//! -------------
//! - Unit tests in the submodules focus on local concerns: solver wiring and
//!   tolerance handling in `minimizer`, update algebra and step directions in
//!   `first_order`, conversions into `OptError` in `errors`.
//! - Integration tests exercise end-to-end nuisance fits, verifying that
//!   configuration mistakes and numerical problems surface as sensible
//!   `OptError` values.

pub mod errors;
pub mod first_order;
pub mod minimizer;

// ---- Optional convenience prelude for downstream crates -------------------
//
// Downstream crates can write
//
//     use pci_nuisance::optimization::prelude::*;
//
// to import the main optimization surface in a single line.

pub mod prelude {
    pub use super::errors::{OptError, OptResult};
    pub use super::first_order::{Adam, FirstOrderConfig, OAdam};
    pub use super::minimizer::prelude::*;
}
