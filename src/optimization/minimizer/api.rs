//! High-level entry point for minimizing a user-provided `MomentLoss`.
//!
//! This selects an L-BFGS solver with either Hager-Zhang or More-Thuente line
//! search, wraps the loss in an `ArgMinAdapter`, and delegates the run to
//! `run_lbfgs`.
use crate::optimization::{
    errors::OptResult,
    minimizer::{
        OptimOutcome, Theta,
        adapter::ArgMinAdapter,
        builders::{build_optimizer_hager_zhang, build_optimizer_more_thuente},
        run::run_lbfgs,
        traits::{LineSearcher, MomentLoss, SolveOptions},
    },
};

/// Minimize a moment loss `L(θ)` using L-BFGS with the chosen line search.
///
/// # Behavior
/// - Validates the initial guess via `f.check(theta0, data)`.
/// - Wraps `(f, data)` in an `ArgMinAdapter` that exposes the minimization
///   problem to `argmin` (no sign conversion).
/// - Builds an L-BFGS solver with either **Hager-Zhang** or **More-Thuente**
///   line search based on `opts.line_searcher`.
/// - Calls `run_lbfgs`, which configures the executor (initial params,
///   max iters) and returns an `OptimOutcome`.
///
/// # Parameters
/// - `f`: Your loss implementing [`MomentLoss`].
/// - `theta0`: Initial parameter vector.
/// - `data`: Loss data passed through to `value`/`grad`.
/// - `opts`: Optimizer options (tolerances, line search choice, memory).
///
/// # Errors
/// - Propagates any error from `f.check`.
/// - Propagates builder errors from `build_optimizer_*`.
/// - Propagates runtime errors from `run_lbfgs` (e.g., line search failures).
///
/// # Returns
/// An [`OptimOutcome`] containing `theta_hat`, best value `L(θ̂)`,
/// termination status, iteration counts, function evaluation counts, and
/// optionally the gradient norm.
///
/// # Example
/// ```no_run
/// use ndarray::array;
/// use pci_nuisance::optimization::minimizer::{
///     minimize, MomentLoss, SolveOptions, Tolerances, LineSearcher,
/// };
/// use pci_nuisance::optimization::errors::OptResult;
///
/// struct MyLoss;
/// impl MomentLoss for MyLoss {
///     type Data = ();
///     fn value(&self, theta: &ndarray::Array1<f64>, _: &()) -> OptResult<f64> {
///         // Simple convex loss: θ·θ
///         Ok(theta.dot(theta))
///     }
///     fn check(&self, _: &ndarray::Array1<f64>, _: &()) -> OptResult<()> {
///         Ok(())
///     }
/// }
///
/// let f = MyLoss;
/// let theta0 = array![0.1, -0.2, 0.3];
/// let opts = SolveOptions {
///     tols: Tolerances { tol_grad: Some(1e-6), tol_cost: None, max_iter: Some(200) },
///     line_searcher: LineSearcher::HagerZhang,
///     lbfgs_mem: None,
/// };
///
/// let out = minimize(&f, theta0, &(), &opts)?;
/// println!("θ̂ = {:?}", out.theta_hat);
/// # Ok::<(), pci_nuisance::optimization::errors::OptError>(())
/// ```
pub fn minimize<F: MomentLoss>(
    f: &F, theta0: Theta, data: &F::Data, opts: &SolveOptions,
) -> OptResult<OptimOutcome> {
    f.check(&theta0, data)?;
    let problem = ArgMinAdapter::new(f, data);
    match opts.line_searcher {
        LineSearcher::MoreThuente => {
            let solver = build_optimizer_more_thuente(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
        LineSearcher::HagerZhang => {
            let solver = build_optimizer_hager_zhang(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{
        errors::OptResult,
        minimizer::{Cost, Grad, Tolerances},
    };
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests run small end-to-end L-BFGS solves on convex toy losses to
    // check that `minimize` wires the adapter, builders, and runner together.
    // -------------------------------------------------------------------------

    /// Shifted quadratic with minimum at (1, -2).
    struct Shifted;

    impl MomentLoss for Shifted {
        type Data = ();

        fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
            let d0 = theta[0] - 1.0;
            let d1 = theta[1] + 2.0;
            Ok(d0 * d0 + d1 * d1)
        }

        fn check(&self, _theta: &Theta, _data: &()) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, _data: &()) -> OptResult<Grad> {
            Ok(array![2.0 * (theta[0] - 1.0), 2.0 * (theta[1] + 2.0)])
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify that `minimize` finds the minimizer of a shifted quadratic
    // with an analytic gradient.
    //
    // Given
    // -----
    // - The shifted quadratic with minimum at (1, -2) and θ₀ = (0, 0).
    //
    // Expect
    // ------
    // - θ̂ within 1e-4 of (1, -2) and a near-zero loss.
    fn minimize_solves_shifted_quadratic() {
        // Arrange
        let f = Shifted;
        let theta0 = array![0.0, 0.0];
        let tols = Tolerances::new(Some(1e-8), None, Some(200)).expect("valid tolerances");
        let opts =
            SolveOptions::new(tols, LineSearcher::MoreThuente, None).expect("valid options");

        // Act
        let out = minimize(&f, theta0, &(), &opts).expect("solve should succeed");

        // Assert
        assert!((out.theta_hat[0] - 1.0).abs() < 1e-4, "theta_hat = {:?}", out.theta_hat);
        assert!((out.theta_hat[1] + 2.0).abs() < 1e-4, "theta_hat = {:?}", out.theta_hat);
        assert!(out.value < 1e-6, "loss should be near zero, got {}", out.value);
    }

    #[test]
    // Purpose
    // -------
    // Verify that `minimize` also converges through the finite-difference
    // gradient path when no analytic gradient is provided.
    //
    // Given
    // -----
    // - A quadratic loss without `grad` and θ₀ = (0.5,).
    //
    // Expect
    // ------
    // - θ̂ within 1e-3 of 0.
    fn minimize_converges_with_fd_gradients() {
        // Arrange
        struct NoGrad;
        impl MomentLoss for NoGrad {
            type Data = ();
            fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
                Ok(theta.dot(theta))
            }
            fn check(&self, _theta: &Theta, _data: &()) -> OptResult<()> {
                Ok(())
            }
        }
        let theta0 = array![0.5];
        let tols = Tolerances::new(Some(1e-6), None, Some(200)).expect("valid tolerances");
        let opts = SolveOptions::new(tols, LineSearcher::HagerZhang, None).expect("valid options");

        // Act
        let out = minimize(&NoGrad, theta0, &(), &opts).expect("solve should succeed");

        // Assert
        assert!(out.theta_hat[0].abs() < 1e-3, "theta_hat = {:?}", out.theta_hat);
    }
}
