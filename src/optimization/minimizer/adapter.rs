//! Bridge from a [`MomentLoss`] to argmin's problem traits.
//!
//! The loss is minimized as given; no sign conversion happens here.
//! Analytic gradients are screened before they reach the solver. Losses
//! without one get a finite-difference gradient: central differences
//! first, one forward-difference retry when the central pass tripped a
//! loss error or produced a bad vector.
use std::cell::RefCell;

use crate::optimization::{
    errors::OptError,
    minimizer::{
        traits::MomentLoss,
        types::{Cost, Grad, Theta},
        validation::{check_gradient, ensure_finite_cost},
    },
};
use argmin::core::{CostFunction, Error, Gradient};
use finitediff::FiniteDiff;

/// Adapter exposing a loss and its frozen data payload to argmin.
#[derive(Debug, Clone)]
pub struct ArgMinAdapter<'a, F: MomentLoss> {
    pub f: &'a F,
    pub data: &'a F::Data,
}

impl<'a, F: MomentLoss> ArgMinAdapter<'a, F> {
    pub fn new(f: &'a F, data: &'a F::Data) -> Self {
        Self { f, data }
    }

    /// Finite-difference gradient of the loss at `theta`.
    ///
    /// The difference closure cannot return `Result`, so the first loss
    /// error is parked in a cell and the closure yields NaN. A parked
    /// error or a non-finite central-difference vector triggers one
    /// forward-difference retry; errors parked during that retry are
    /// surfaced as the final result.
    fn fd_gradient(&self, theta: &Theta) -> Result<Grad, Error> {
        let parked: RefCell<Option<Error>> = RefCell::new(None);
        let loss = |t: &Theta| -> f64 {
            match self.cost(t) {
                Ok(v) => v,
                Err(e) => {
                    parked.borrow_mut().get_or_insert(e);
                    f64::NAN
                }
            }
        };
        let dim = theta.len();
        let central = theta.central_diff(&loss);
        if parked.borrow().is_none() && check_gradient(&central, dim).is_ok() {
            return Ok(central);
        }
        parked.replace(None);
        let forward = theta.forward_diff(&loss);
        if let Some(err) = parked.take() {
            return Err(err);
        }
        check_gradient(&forward, dim)?;
        Ok(forward)
    }
}

impl<'a, F: MomentLoss> CostFunction for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Output = Cost;

    /// Evaluate `L(θ)`, rejecting non-finite values at the boundary.
    ///
    /// # Errors
    /// Propagates the loss's own [`OptError`] values and reports NaN or
    /// infinite outputs as [`OptError::NonFiniteCost`].
    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let value = self.f.value(theta, self.data)?;
        ensure_finite_cost(value)?;
        Ok(value)
    }
}

impl<'a, F: MomentLoss> Gradient for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Gradient = Grad;

    /// Analytic gradient when the loss provides one, finite differences
    /// otherwise.
    ///
    /// # Errors
    /// - Screening failures for a wrong-dimension or non-finite analytic
    ///   gradient.
    /// - Loss errors raised during finite differencing.
    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        match self.f.grad(theta, self.data) {
            Ok(g) => {
                check_gradient(&g, theta.len())?;
                Ok(g)
            }
            Err(OptError::GradientNotImplemented) => self.fd_gradient(theta),
            Err(e) => Err(e.into()),
        }
    }
}
