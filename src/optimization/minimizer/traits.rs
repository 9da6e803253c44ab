//! Loss contract and solver configuration for moment minimization.
//!
//! Purpose
//! -------
//! Everything an estimator needs to hand a stage loss to the solver lives
//! here: the [`MomentLoss`] trait it implements, the validated
//! [`Tolerances`] / [`SolveOptions`] pair it configures the solve with,
//! and the [`OptimOutcome`] it gets back.
//!
//! Conventions
//! -----------
//! - The solver minimizes `L(θ)` as given. An analytic [`MomentLoss::grad`]
//!   must therefore be the gradient of the loss itself; nothing in this
//!   layer negates values or gradients.
//! - Configuration types reject bad inputs at construction, so the runner
//!   can assume finite, positive tolerances throughout.
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::{
        Cost, FnEvalMap, Grad, Theta,
        validation::{ensure_finite_cost, take_theta_hat},
    },
};
use argmin::core::TerminationStatus;
use argmin_math::ArgminL2Norm;
use std::str::FromStr;

/// Empirical moment loss over a frozen per-stage data payload.
///
/// `value` and `check` are required; `check` runs once before the solve to
/// reject obviously invalid starting points. `grad` is optional: losses
/// without one fall back to finite differences in the adapter.
pub trait MomentLoss {
    type Data: 'static;

    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<Cost>;
    fn check(&self, theta: &Theta, data: &Self::Data) -> OptResult<()>;

    fn grad(&self, _theta: &Theta, _data: &Self::Data) -> OptResult<Grad> {
        Err(OptError::GradientNotImplemented)
    }
}

/// Line search driving the L-BFGS step length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearcher {
    MoreThuente,
    HagerZhang,
}

impl FromStr for LineSearcher {
    type Err = OptError;

    /// Parse a line-search name, ignoring ASCII case.
    ///
    /// # Errors
    /// [`OptError::InvalidLineSearch`] for anything other than
    /// `MoreThuente` or `HagerZhang`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("morethuente") {
            Ok(LineSearcher::MoreThuente)
        } else if s.eq_ignore_ascii_case("hagerzhang") {
            Ok(LineSearcher::HagerZhang)
        } else {
            Err(OptError::InvalidLineSearch {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'MoreThuente' or 'HagerZhang'.",
            })
        }
    }
}

/// Stopping rules for one solve. At least one rule must be present.
///
/// - `tol_grad`: stop when the gradient norm falls below this.
/// - `tol_cost`: stop when the loss change falls below this.
/// - `max_iter`: hard iteration cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub tol_grad: Option<f64>,
    pub tol_cost: Option<f64>,
    pub max_iter: Option<usize>,
}

impl Tolerances {
    /// Construct validated stopping rules.
    ///
    /// # Errors
    /// - [`OptError::NoTolerancesProvided`] when all three are `None`.
    /// - [`OptError::InvalidTolGrad`] / [`OptError::InvalidTolCost`] for
    ///   non-finite or non-positive tolerances.
    /// - [`OptError::InvalidMaxIter`] for a zero iteration cap.
    pub fn new(
        tol_grad: Option<f64>, tol_cost: Option<f64>, max_iter: Option<usize>,
    ) -> OptResult<Self> {
        if tol_grad.is_none() && tol_cost.is_none() && max_iter.is_none() {
            return Err(OptError::NoTolerancesProvided);
        }
        if let Some(tol) = tol_grad {
            if !tol.is_finite() || tol <= 0.0 {
                return Err(OptError::InvalidTolGrad {
                    tol,
                    reason: "Tolerance must be finite and positive.",
                });
            }
        }
        if let Some(tol) = tol_cost {
            if !tol.is_finite() || tol <= 0.0 {
                return Err(OptError::InvalidTolCost {
                    tol,
                    reason: "Tolerance must be finite and positive.",
                });
            }
        }
        if let Some(max_iter) = max_iter {
            if max_iter == 0 {
                return Err(OptError::InvalidMaxIter {
                    max_iter,
                    reason: "Maximum iterations must be greater than zero.",
                });
            }
        }
        Ok(Self { tol_grad, tol_cost, max_iter })
    }
}

/// Solver configuration: stopping rules, line search, and L-BFGS history.
///
/// `lbfgs_mem = None` uses the crate default of 7.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOptions {
    pub tols: Tolerances,
    pub line_searcher: LineSearcher,
    pub lbfgs_mem: Option<usize>,
}

impl SolveOptions {
    /// Bundle pre-validated tolerances with the remaining solver knobs.
    ///
    /// # Errors
    /// [`OptError::InvalidLBFGSMem`] for a zero history size.
    pub fn new(
        tols: Tolerances, line_searcher: LineSearcher, lbfgs_mem: Option<usize>,
    ) -> OptResult<Self> {
        match lbfgs_mem {
            Some(0) => Err(OptError::InvalidLBFGSMem {
                mem: 0,
                reason: "L-BFGS memory must be greater than zero.",
            }),
            _ => Ok(Self { tols, line_searcher, lbfgs_mem }),
        }
    }
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tols: Tolerances { tol_grad: Some(1e-6), tol_cost: None, max_iter: Some(300) },
            line_searcher: LineSearcher::MoreThuente,
            lbfgs_mem: None,
        }
    }
}

/// Normalized result of one solve.
///
/// `value` is the loss at `theta_hat`; `fn_evals` carries argmin's
/// evaluation counters keyed by counter name.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimOutcome {
    pub theta_hat: Theta,
    pub value: f64,
    pub converged: bool,
    pub status: String,
    pub iterations: usize,
    pub fn_evals: FnEvalMap,
    pub grad_norm: Option<f64>,
}

impl OptimOutcome {
    /// Assemble a validated outcome from raw solver state.
    ///
    /// # Errors
    /// Rejects a missing or non-finite `theta_hat` and a non-finite loss
    /// value; see [`take_theta_hat`] and [`ensure_finite_cost`].
    pub fn new(
        theta_hat_opt: Option<Theta>, value: f64, converged: TerminationStatus, iterations: u64,
        fn_evals: FnEvalMap, grad: Option<Grad>,
    ) -> OptResult<Self> {
        let theta_hat = take_theta_hat(theta_hat_opt)?;
        ensure_finite_cost(value)?;
        let (converged, status) = match converged {
            TerminationStatus::NotTerminated => (false, "Not terminated".to_string()),
            other => (true, format!("{other:?}")),
        };
        Ok(Self {
            theta_hat,
            value,
            converged,
            status,
            iterations: iterations as usize,
            fn_evals,
            grad_norm: grad.map(|g| g.l2_norm()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::collections::HashMap;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Tolerance construction rules (all-None rejection, positivity).
    // - SolveOptions lbfgs_mem validation.
    // - LineSearcher parsing.
    // - OptimOutcome validation of theta_hat and value.
    //
    // They intentionally DO NOT cover:
    // - Solver execution, which is tested in the runner and integration layers.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Ensure `Tolerances::new` refuses a solve with no stopping rule at
    // all.
    //
    // Given
    // -----
    // - `tol_grad = None`, `tol_cost = None`, `max_iter = None`.
    //
    // Expect
    // ------
    // - `Err(OptError::NoTolerancesProvided)`.
    fn tolerances_reject_all_none() {
        // Act
        let tols = Tolerances::new(None, None, None);

        // Assert
        assert_eq!(tols, Err(OptError::NoTolerancesProvided));
    }

    #[test]
    // Purpose
    // -------
    // Verify that non-positive or non-finite tolerances are rejected for
    // both stopping rules.
    //
    // Given
    // -----
    // - `tol_grad = Some(0.0)`, then `tol_cost = Some(inf)`.
    //
    // Expect
    // ------
    // - `Err(OptError::InvalidTolGrad { .. })` and
    //   `Err(OptError::InvalidTolCost { .. })`.
    fn tolerances_reject_degenerate_values() {
        // Act + Assert
        assert!(matches!(
            Tolerances::new(Some(0.0), None, Some(100)),
            Err(OptError::InvalidTolGrad { .. })
        ));
        assert!(matches!(
            Tolerances::new(None, Some(f64::INFINITY), Some(100)),
            Err(OptError::InvalidTolCost { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Verify that `SolveOptions::new` rejects a zero L-BFGS memory.
    //
    // Given
    // -----
    // - Valid tolerances and `lbfgs_mem = Some(0)`.
    //
    // Expect
    // ------
    // - `Err(OptError::InvalidLBFGSMem { .. })`.
    fn solve_options_reject_zero_memory() {
        // Arrange
        let tols = Tolerances::new(Some(1e-6), None, Some(50)).expect("Tolerances should be valid");

        // Act
        let opts = SolveOptions::new(tols, LineSearcher::MoreThuente, Some(0));

        // Assert
        assert!(matches!(opts, Err(OptError::InvalidLBFGSMem { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Confirm case-insensitive parsing of line-search names and rejection
    // of unknown names.
    //
    // Given
    // -----
    // - The strings "hagerzhang", "MoreThuente", and "newton".
    //
    // Expect
    // ------
    // - The first two parse to their variants; the third errors.
    fn line_searcher_parses_case_insensitively() {
        // Act + Assert
        assert_eq!("hagerzhang".parse::<LineSearcher>(), Ok(LineSearcher::HagerZhang));
        assert_eq!("MoreThuente".parse::<LineSearcher>(), Ok(LineSearcher::MoreThuente));
        assert!(matches!(
            "newton".parse::<LineSearcher>(),
            Err(OptError::InvalidLineSearch { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Ensure that `OptimOutcome::new` rejects a missing parameter estimate.
    //
    // Given
    // -----
    // - `theta_hat_opt = None` and an otherwise valid state.
    //
    // Expect
    // ------
    // - `Err(OptError::MissingThetaHat)`.
    fn optim_outcome_rejects_missing_theta_hat() {
        // Act
        let outcome = OptimOutcome::new(
            None,
            0.5,
            TerminationStatus::NotTerminated,
            10,
            HashMap::new(),
            None,
        );

        // Assert
        assert_eq!(outcome, Err(OptError::MissingThetaHat));
    }

    #[test]
    // Purpose
    // -------
    // Ensure that `OptimOutcome::new` rejects non-finite loss values.
    //
    // Given
    // -----
    // - A finite `theta_hat` but `value = NaN`.
    //
    // Expect
    // ------
    // - `Err(OptError::NonFiniteCost { .. })`.
    fn optim_outcome_rejects_non_finite_value() {
        // Act
        let outcome = OptimOutcome::new(
            Some(array![1.0, 2.0]),
            f64::NAN,
            TerminationStatus::NotTerminated,
            10,
            HashMap::new(),
            None,
        );

        // Assert
        assert!(matches!(outcome, Err(OptError::NonFiniteCost { .. })));
    }
}
