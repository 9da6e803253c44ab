//! Finiteness checks shared by the adapter and the outcome assembly.
//!
//! Every vector that crosses the solver boundary is screened here:
//! gradients on the way in, the parameter estimate and loss value on the
//! way out. Offending entries are reported with their index so estimator
//! logs point at the broken coordinate directly.
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::{Grad, Theta},
};

/// Screen a gradient for the expected dimension and finite entries.
///
/// # Errors
/// - [`OptError::GradientDimMismatch`] when the length disagrees with `dim`.
/// - [`OptError::InvalidGradient`] naming the first non-finite entry.
pub fn check_gradient(grad: &Grad, dim: usize) -> OptResult<()> {
    if grad.len() != dim {
        return Err(OptError::GradientDimMismatch { expected: dim, found: grad.len() });
    }
    match grad.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        Some((index, &value)) => Err(OptError::InvalidGradient {
            index,
            value,
            reason: "Gradient elements must be finite.",
        }),
        None => Ok(()),
    }
}

/// Unwrap the solver's best parameter vector, requiring finite entries.
///
/// # Errors
/// - [`OptError::MissingThetaHat`] when the solver produced no estimate.
/// - [`OptError::InvalidThetaHat`] naming the first non-finite entry.
pub fn take_theta_hat(theta_hat: Option<Theta>) -> OptResult<Theta> {
    let theta = theta_hat.ok_or(OptError::MissingThetaHat)?;
    match theta.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        Some((index, &value)) => Err(OptError::InvalidThetaHat {
            index,
            value,
            reason: "Parameter estimates must be finite.",
        }),
        None => Ok(theta),
    }
}

/// Require a finite loss value; sign is unconstrained.
///
/// # Errors
/// [`OptError::NonFiniteCost`] for `NaN` or infinities.
pub fn ensure_finite_cost(value: f64) -> OptResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(OptError::NonFiniteCost { value })
    }
}
