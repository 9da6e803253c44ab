//! critics — black-box function approximators for bridge functions.
//!
//! Purpose
//! -------
//! Every estimator treats the functions it fits (Q-bridges, H-bridges, and
//! the adversarial test functions of the joint game) as opaque
//! parameter-vector critics. [`CriticNet`] is that contract: a flat
//! parameter vector `θ`, a batched forward pass over an embedded design
//! matrix, and an exact vector-Jacobian product for parameter gradients.
//! The quasi-Newton and first-order optimizers only ever see `θ`.
//!
//! Key behaviors
//! -------------
//! - [`CriticNet`]: params get/set, `forward` (current params),
//!   `forward_with` (candidate params, used inside loss evaluations without
//!   mutating the net), `param_grad` (VJP: upstream ∂L/∂output into ∂L/∂θ),
//!   and a finiteness check used by retry loops.
//! - [`TabularNet`]: pure linear map `X·w`; over one-hot inputs this is a
//!   lookup table with one cell per embedded level.
//! - [`LinearCritic`]: affine map `X·w + b`.
//! - [`NetKind`]: tagged configuration; estimators build fresh seeded
//!   instances per stage instead of receiving class objects.
//!
//! Conventions
//! -----------
//! - Initialization draws uniform weights in `[-0.1, 0.1]` from a caller
//!   seeded `StdRng`, so every fit is reproducible from its seed.
//! - Dimension mismatches surface as [`OptError::ThetaLengthMismatch`];
//!   critics never panic on bad shapes.
use ndarray::{Array1, ArrayView2};
use rand::Rng;
use rand::rngs::StdRng;

use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::{Grad, Theta},
};

/// Black-box function approximator over embedded inputs.
///
/// `forward_with` and `param_grad` take an explicit candidate `θ` so that
/// moment losses can be evaluated at solver iterates without mutating the
/// net; `forward` uses the currently stored parameters.
pub trait CriticNet {
    /// Length of the flat parameter vector.
    fn num_params(&self) -> usize;

    /// Snapshot of the current parameters.
    fn params(&self) -> Theta;

    /// Replace the stored parameters.
    ///
    /// # Errors
    /// [`OptError::ThetaLengthMismatch`] when `theta` has the wrong length.
    fn set_params(&mut self, theta: &Theta) -> OptResult<()>;

    /// Batched forward pass with the stored parameters.
    fn forward(&self, inputs: &ArrayView2<f64>) -> Array1<f64>;

    /// Batched forward pass at a candidate parameter vector.
    ///
    /// # Errors
    /// [`OptError::ThetaLengthMismatch`] when `theta` has the wrong length.
    fn forward_with(&self, theta: &Theta, inputs: &ArrayView2<f64>) -> OptResult<Array1<f64>>;

    /// Vector-Jacobian product: fold `upstream = ∂L/∂output` into `∂L/∂θ`
    /// at the candidate `theta`.
    ///
    /// # Errors
    /// [`OptError::ThetaLengthMismatch`] when `theta` has the wrong length.
    fn param_grad(
        &self, theta: &Theta, inputs: &ArrayView2<f64>, upstream: &Array1<f64>,
    ) -> OptResult<Grad>;

    /// Whether every stored parameter is finite.
    fn is_finite(&self) -> bool;

    /// Clone into a boxed trait object (critics travel inside fitted
    /// nuisance functions).
    fn clone_box(&self) -> Box<dyn CriticNet>;
}

impl Clone for Box<dyn CriticNet> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Tagged critic configuration; estimators build fresh seeded instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetKind {
    /// Pure linear map, a lookup table over one-hot inputs.
    Tabular,
    /// Affine map with a bias term.
    Linear,
}

impl NetKind {
    pub fn build(&self, input_dim: usize, rng: &mut StdRng) -> Box<dyn CriticNet> {
        match self {
            NetKind::Tabular => Box::new(TabularNet::new(input_dim, rng)),
            NetKind::Linear => Box::new(LinearCritic::new(input_dim, rng)),
        }
    }
}

fn init_weights(len: usize, rng: &mut StdRng) -> Array1<f64> {
    Array1::from_iter((0..len).map(|_| rng.random_range(-0.1..0.1)))
}

/// Pure linear critic `f(X) = X·w`.
///
/// Over one-hot embeddings each weight is the fitted value of one embedded
/// level, which is why the tabular estimators read their tables straight
/// out of `params`.
#[derive(Debug, Clone)]
pub struct TabularNet {
    weights: Array1<f64>,
}

impl TabularNet {
    pub fn new(input_dim: usize, rng: &mut StdRng) -> Self {
        Self { weights: init_weights(input_dim, rng) }
    }
}

impl CriticNet for TabularNet {
    fn num_params(&self) -> usize {
        self.weights.len()
    }

    fn params(&self) -> Theta {
        self.weights.clone()
    }

    fn set_params(&mut self, theta: &Theta) -> OptResult<()> {
        if theta.len() != self.weights.len() {
            return Err(OptError::ThetaLengthMismatch {
                expected: self.weights.len(),
                actual: theta.len(),
            });
        }
        self.weights = theta.clone();
        Ok(())
    }

    fn forward(&self, inputs: &ArrayView2<f64>) -> Array1<f64> {
        inputs.dot(&self.weights)
    }

    fn forward_with(&self, theta: &Theta, inputs: &ArrayView2<f64>) -> OptResult<Array1<f64>> {
        if theta.len() != self.weights.len() {
            return Err(OptError::ThetaLengthMismatch {
                expected: self.weights.len(),
                actual: theta.len(),
            });
        }
        Ok(inputs.dot(theta))
    }

    fn param_grad(
        &self, theta: &Theta, inputs: &ArrayView2<f64>, upstream: &Array1<f64>,
    ) -> OptResult<Grad> {
        if theta.len() != self.weights.len() {
            return Err(OptError::ThetaLengthMismatch {
                expected: self.weights.len(),
                actual: theta.len(),
            });
        }
        // d(X·w)/dw folded with upstream: Xᵀ·upstream.
        Ok(inputs.t().dot(upstream))
    }

    fn is_finite(&self) -> bool {
        self.weights.iter().all(|v| v.is_finite())
    }

    fn clone_box(&self) -> Box<dyn CriticNet> {
        Box::new(self.clone())
    }
}

/// Affine critic `f(X) = X·w + b` with `θ = [w…, b]`.
#[derive(Debug, Clone)]
pub struct LinearCritic {
    weights: Array1<f64>,
    bias: f64,
}

impl LinearCritic {
    pub fn new(input_dim: usize, rng: &mut StdRng) -> Self {
        Self { weights: init_weights(input_dim, rng), bias: rng.random_range(-0.1..0.1) }
    }

    fn split(&self, theta: &Theta) -> OptResult<(Array1<f64>, f64)> {
        if theta.len() != self.num_params() {
            return Err(OptError::ThetaLengthMismatch {
                expected: self.num_params(),
                actual: theta.len(),
            });
        }
        let d = self.weights.len();
        Ok((theta.slice(ndarray::s![..d]).to_owned(), theta[d]))
    }
}

impl CriticNet for LinearCritic {
    fn num_params(&self) -> usize {
        self.weights.len() + 1
    }

    fn params(&self) -> Theta {
        let mut theta = Array1::zeros(self.num_params());
        theta.slice_mut(ndarray::s![..self.weights.len()]).assign(&self.weights);
        theta[self.weights.len()] = self.bias;
        theta
    }

    fn set_params(&mut self, theta: &Theta) -> OptResult<()> {
        let (w, b) = self.split(theta)?;
        self.weights = w;
        self.bias = b;
        Ok(())
    }

    fn forward(&self, inputs: &ArrayView2<f64>) -> Array1<f64> {
        inputs.dot(&self.weights) + self.bias
    }

    fn forward_with(&self, theta: &Theta, inputs: &ArrayView2<f64>) -> OptResult<Array1<f64>> {
        let (w, b) = self.split(theta)?;
        Ok(inputs.dot(&w) + b)
    }

    fn param_grad(
        &self, theta: &Theta, inputs: &ArrayView2<f64>, upstream: &Array1<f64>,
    ) -> OptResult<Grad> {
        if theta.len() != self.num_params() {
            return Err(OptError::ThetaLengthMismatch {
                expected: self.num_params(),
                actual: theta.len(),
            });
        }
        let mut grad = Array1::zeros(self.num_params());
        grad.slice_mut(ndarray::s![..self.weights.len()]).assign(&inputs.t().dot(upstream));
        grad[self.weights.len()] = upstream.sum();
        Ok(grad)
    }

    fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.weights.iter().all(|v| v.is_finite())
    }

    fn clone_box(&self) -> Box<dyn CriticNet> {
        Box::new(self.clone())
    }
}
