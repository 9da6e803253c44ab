//! first_order — stateful Adam-family updaters for iterative training loops.
//!
//! Purpose
//! -------
//! Provide first-order parameter updaters for the places where a full
//! quasi-Newton solve is the wrong tool: the discrete estimator's fallback
//! loop (many cheap steps over a small table) and the joint adversarial
//! game (simultaneous updates of competing players). Two updaters are
//! offered:
//!
//! - [`Adam`]: standard Adam with bias correction.
//! - [`OAdam`]: optimistic Adam, which extrapolates with the previous update
//!   (θ ← θ − 2·step_t + step_{t-1}) to stabilize adversarial dynamics.
//!
//! Conventions
//! -----------
//! - Both updaters **descend**: `step` moves parameters against the supplied
//!   gradient. Adversarial players that maximize pass the negated gradient.
//! - State (first/second moment estimates) is allocated lazily on the first
//!   step and is tied to the parameter dimension seen there; a later
//!   dimension change is an error.
//! - Invalid configurations and gradient dimension mismatches surface as
//!   [`OptError`] values, never panics.
//!
//! Testing notes
//! -------------
//! - Unit tests check descent on a convex quadratic, the optimistic
//!   extrapolation term, and dimension-mismatch rejection.
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::{Grad, Theta},
};
use ndarray::Array1;

/// Hyperparameters shared by the Adam-family updaters.
///
/// - `lr`: learning rate, finite and strictly positive.
/// - `beta1` / `beta2`: exponential decay rates for the first and second
///   moment estimates, each in `[0, 1)`.
/// - `eps`: denominator stabilizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstOrderConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl FirstOrderConfig {
    /// Construct a validated configuration with the usual Adam defaults
    /// for everything but the learning rate.
    ///
    /// # Errors
    /// Returns [`OptError::InvalidLearningRate`] if `lr` is non-finite or
    /// not strictly positive.
    pub fn with_lr(lr: f64) -> OptResult<Self> {
        if !lr.is_finite() {
            return Err(OptError::InvalidLearningRate {
                lr,
                reason: "Learning rate must be finite.",
            });
        }
        if lr <= 0.0 {
            return Err(OptError::InvalidLearningRate {
                lr,
                reason: "Learning rate must be positive.",
            });
        }
        Ok(Self { lr, beta1: 0.9, beta2: 0.999, eps: 1e-8 })
    }
}

/// Moment-estimate state shared by [`Adam`] and [`OAdam`].
#[derive(Debug, Clone)]
struct MomentState {
    m: Array1<f64>,
    v: Array1<f64>,
    t: u64,
}

impl MomentState {
    fn new(dim: usize) -> Self {
        Self { m: Array1::zeros(dim), v: Array1::zeros(dim), t: 0 }
    }

    /// Advance the moment estimates and return the bias-corrected step
    /// `lr · m̂ / (√v̂ + ε)` for the current gradient.
    fn advance(&mut self, grad: &Grad, cfg: &FirstOrderConfig) -> Array1<f64> {
        self.t += 1;
        self.m = cfg.beta1 * &self.m + (1.0 - cfg.beta1) * grad;
        self.v = cfg.beta2 * &self.v + (1.0 - cfg.beta2) * &grad.mapv(|g| g * g);
        let bias1 = 1.0 - cfg.beta1.powi(self.t as i32);
        let bias2 = 1.0 - cfg.beta2.powi(self.t as i32);
        let m_hat = &self.m / bias1;
        let v_hat = &self.v / bias2;
        cfg.lr * &m_hat / &(v_hat.mapv(f64::sqrt) + cfg.eps)
    }
}

fn check_dims(state: &Option<MomentState>, params: &Theta, grad: &Grad) -> OptResult<()> {
    if grad.len() != params.len() {
        return Err(OptError::GradientDimMismatch { expected: params.len(), found: grad.len() });
    }
    if let Some(s) = state {
        if s.m.len() != params.len() {
            return Err(OptError::ThetaLengthMismatch {
                expected: s.m.len(),
                actual: params.len(),
            });
        }
    }
    Ok(())
}

/// Standard Adam updater.
#[derive(Debug, Clone)]
pub struct Adam {
    cfg: FirstOrderConfig,
    state: Option<MomentState>,
}

impl Adam {
    pub fn new(cfg: FirstOrderConfig) -> Self {
        Self { cfg, state: None }
    }

    /// Apply one descent step in place: `θ ← θ − lr · m̂ / (√v̂ + ε)`.
    ///
    /// # Errors
    /// - [`OptError::GradientDimMismatch`] if `grad` and `params` disagree.
    /// - [`OptError::ThetaLengthMismatch`] if the parameter dimension changed
    ///   since the first step.
    pub fn step(&mut self, params: &mut Theta, grad: &Grad) -> OptResult<()> {
        check_dims(&self.state, params, grad)?;
        let state = self.state.get_or_insert_with(|| MomentState::new(params.len()));
        let update = state.advance(grad, &self.cfg);
        *params -= &update;
        Ok(())
    }
}

/// Optimistic Adam updater (Daskalakis et al., "Training GANs with
/// Optimism").
///
/// Applies `θ ← θ − 2·step_t + step_{t-1}`, where `step_t` is the
/// bias-corrected Adam step. The look-ahead term damps the rotational
/// dynamics of simultaneous-gradient play, which is why the joint game
/// trainer uses it for every player.
#[derive(Debug, Clone)]
pub struct OAdam {
    cfg: FirstOrderConfig,
    state: Option<MomentState>,
    prev_step: Option<Array1<f64>>,
}

impl OAdam {
    pub fn new(cfg: FirstOrderConfig) -> Self {
        Self { cfg, state: None, prev_step: None }
    }

    /// Apply one optimistic descent step in place.
    ///
    /// # Errors
    /// - [`OptError::GradientDimMismatch`] if `grad` and `params` disagree.
    /// - [`OptError::ThetaLengthMismatch`] if the parameter dimension changed
    ///   since the first step.
    pub fn step(&mut self, params: &mut Theta, grad: &Grad) -> OptResult<()> {
        check_dims(&self.state, params, grad)?;
        let state = self.state.get_or_insert_with(|| MomentState::new(params.len()));
        let step = state.advance(grad, &self.cfg);
        match &self.prev_step {
            Some(prev) => *params = &*params - &(2.0 * &step) + prev,
            None => *params -= &(2.0 * &step),
        }
        self.prev_step = Some(step);
        Ok(())
    }
}
