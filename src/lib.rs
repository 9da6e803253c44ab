//! pci_nuisance — nuisance estimation for proximal causal inference over
//! sequential decision processes.
//!
//! Purpose
//! -------
//! Estimate the bridge functions that make off-policy evaluation possible
//! when the decision-relevant state is never observed directly: a Q-bridge
//! reweighting future-facing proxies and an H-bridge projecting outcomes
//! onto past-facing proxies, fitted stage by stage across a finite horizon
//! and tied together by cumulative importance weights and discounted
//! targets.
//!
//! Key behaviors
//! -------------
//! - Four interchangeable per-stage estimator families (`estimators`):
//!   single-kernel minimax, maximum moment restriction, closed-form
//!   double-kernel, and a tabular solver for fully discrete proxy spaces.
//! - A sequential orchestrator (`sequential`) that threads weights forward
//!   and targets backward through any estimator pair.
//! - A joint adversarial trainer (`game`) that fits every stage at once on
//!   a shared reverse-mode tape.
//! - Supporting layers: validated trajectory containers and feature maps
//!   (`data`), tuned PSD kernels (`kernels`), differentiable critics
//!   (`critics`), tuple deduplication (`dedup`), and the optimization
//!   surface (`optimization`).
//!
//! Conventions
//! -----------
//! - Columns are `ndarray` vectors per stage; actions are `usize` codes,
//!   proxies and contexts are `f64`.
//! - Every layer reports failures through its own error enum and the
//!   estimator layer wraps them into `EstimError`; no panics on bad input.
//! - Progress and diagnostics go through the `log` facade; binaries choose
//!   the backend.
//!
//! Downstream usage
//! ----------------
//! - Typical callers build a [`data::TrajectoryBatch`], pick an
//!   [`data::EmbeddingSet`] for their proxy spaces, and run either
//!   [`sequential::SequentialNuisanceEstimation`] or
//!   [`game::JointNuisanceTrainer`]; the returned
//!   [`sequential::FittedNuisances`] feed whatever policy-value estimator
//!   sits downstream.

pub mod critics;
pub mod data;
pub mod dedup;
pub mod estimators;
pub mod game;
pub mod kernels;
pub mod optimization;
pub mod sequential;
