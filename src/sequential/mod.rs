//! sequential — stage-by-stage nuisance estimation over a decision horizon.
//!
//! Purpose
//! -------
//! Orchestrate the per-stage estimators across a whole sequential decision
//! process: fit the Q-bridges forward in time while threading cumulative
//! importance weights, then fit the H-bridges backward while threading
//! discounted outcome targets. The orchestrator owns the threading algebra;
//! the per-stage fits are delegated to whichever [`QEstimator`] /
//! [`HEstimator`] pair it was built with.
//!
//! Key behaviors
//! -------------
//! - Forward pass: stage `t` is fitted with the weights entering it,
//!   `η_{t} = η_{t-1} · q_t(z_t, a_t) · 1{a_t = e_t}` with `η_{-1} ≡ 1`, so
//!   each Q fit sees exactly the mass of trajectories still agreeing with
//!   the evaluation policy.
//! - Backward pass: stage `t` is fitted against
//!   `y_t = r_t + γ · res_{t+1}` where the future residual
//!   `res_{t+1} = q_{t+1}·(1{a = e}·y_{t+1} − h_{t+1}(w, a)) + Σ_a h_{t+1}(w, a)`
//!   replaces the unobservable continuation value with its bridge form;
//!   beyond the horizon the residual is zero.
//! - The plausible H range is threaded alongside: the band at stage `t` is
//!   `[min r_t, max r_t] + γ · band_{t+1}`, handed to the estimators for
//!   their penalties.
//!
//! Invariants & assumptions
//! ------------------------
//! - `fit` validates the dataset horizon against the configuration before
//!   touching any stage.
//! - The weight vectors handed to the H fits are exactly the ones the
//!   forward pass produced: `ν_t = η_{t-1}` and `μ_t = η_{t-1}·y_t·1{a = e}`.
//!
//! Testing notes
//! -------------
//! - Unit tests drive the orchestrator with recording stub estimators so
//!   the threading algebra is checked independently of any real fit.
use std::sync::Arc;

use ndarray::Array1;

use crate::data::dataset::{PciDataset, StageData};
use crate::data::embedding::EmbeddingSet;
use crate::estimators::discrete::{DiscreteConfig, DiscreteEstimator};
use crate::estimators::discrete_mmr::{DiscreteMmrConfig, DiscreteMmrEstimator};
use crate::estimators::double_kernel::{DoubleKernelConfig, DoubleKernelEstimator};
use crate::estimators::errors::{EstimError, EstimResult};
use crate::estimators::mmr::{MmrConfig, MmrEstimator};
use crate::estimators::single_kernel::{SingleKernelConfig, SingleKernelEstimator};
use crate::estimators::traits::{HEstimator, HStageInputs, NuisanceFn, QEstimator};

/// Fitted bridge functions for every stage, plus the threaded weights.
///
/// `eta_prev[t]` holds the cumulative weights entering stage `t` (all ones
/// at `t = 0`); `eta_final` is the weight vector after the last stage.
pub struct FittedNuisances {
    pub q: Vec<NuisanceFn>,
    pub h: Vec<NuisanceFn>,
    pub eta_prev: Vec<Array1<f64>>,
    pub eta_final: Array1<f64>,
}

/// Orchestrator over a fixed horizon, discount factor, and action space.
pub struct SequentialNuisanceEstimation {
    emb: Arc<dyn EmbeddingSet>,
    horizon: usize,
    gamma: f64,
    num_a: usize,
    q_estimator: Box<dyn QEstimator>,
    h_estimator: Box<dyn HEstimator>,
}

impl SequentialNuisanceEstimation {
    /// Build an orchestrator around an explicit estimator pair.
    ///
    /// # Errors
    /// [`EstimError::InvalidConfig`] for a zero horizon, empty action
    /// space, or a discount factor outside `(0, 1]`.
    pub fn new(
        emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize,
        q_estimator: Box<dyn QEstimator>, h_estimator: Box<dyn HEstimator>,
    ) -> EstimResult<Self> {
        if horizon == 0 {
            return Err(EstimError::InvalidConfig { what: "horizon must be positive" });
        }
        if num_a == 0 {
            return Err(EstimError::InvalidConfig { what: "action space must be non-empty" });
        }
        if !gamma.is_finite() || gamma <= 0.0 || gamma > 1.0 {
            return Err(EstimError::InvalidConfig { what: "discount factor must lie in (0, 1]" });
        }
        Ok(Self { emb, horizon, gamma, num_a, q_estimator, h_estimator })
    }

    /// Single-kernel minimax estimators for both directions.
    pub fn with_single_kernel(
        emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize,
        cfg: SingleKernelConfig,
    ) -> EstimResult<Self> {
        let q = Box::new(SingleKernelEstimator::new(cfg, emb.clone()));
        let h = Box::new(SingleKernelEstimator::new(cfg, emb.clone()));
        Self::new(emb, horizon, gamma, num_a, q, h)
    }

    /// Maximum moment restriction estimators for both directions.
    pub fn with_mmr(
        emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize, cfg: MmrConfig,
    ) -> EstimResult<Self> {
        let q = Box::new(MmrEstimator::new(cfg, emb.clone()));
        let h = Box::new(MmrEstimator::new(cfg, emb.clone()));
        Self::new(emb, horizon, gamma, num_a, q, h)
    }

    /// Normalized MMR estimators over deduplicated tuples.
    pub fn with_discrete_mmr(
        emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize,
        cfg: DiscreteMmrConfig,
    ) -> EstimResult<Self> {
        let q = Box::new(DiscreteMmrEstimator::new(cfg, emb.clone()));
        let h = Box::new(DiscreteMmrEstimator::new(cfg, emb.clone()));
        Self::new(emb, horizon, gamma, num_a, q, h)
    }

    /// Tabular estimators for discrete proxy spaces.
    pub fn with_discrete(
        emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize, cfg: DiscreteConfig,
    ) -> EstimResult<Self> {
        let q = Box::new(DiscreteEstimator::new(cfg, emb.clone()));
        let h = Box::new(DiscreteEstimator::new(cfg, emb.clone()));
        Self::new(emb, horizon, gamma, num_a, q, h)
    }

    /// Closed-form double-kernel estimators for both directions.
    pub fn with_double_kernel(
        emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize,
        cfg: DoubleKernelConfig,
    ) -> EstimResult<Self> {
        let q = Box::new(DoubleKernelEstimator::new(cfg, emb.clone()));
        let h = Box::new(DoubleKernelEstimator::new(cfg, emb.clone()));
        Self::new(emb, horizon, gamma, num_a, q, h)
    }

    /// Fit every stage: Q-bridges forward, H-bridges backward.
    pub fn fit(&mut self, ds: &dyn PciDataset) -> EstimResult<FittedNuisances> {
        if ds.horizon() != self.horizon {
            return Err(EstimError::HorizonMismatch {
                expected: self.horizon,
                found: ds.horizon(),
            });
        }
        let n = ds.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }

        // Forward pass: fit Q and thread the cumulative weights.
        let mut stages = Vec::with_capacity(self.horizon);
        let mut q_fits = Vec::with_capacity(self.horizon);
        let mut q_vals_per_stage = Vec::with_capacity(self.horizon);
        let mut eta_prevs = Vec::with_capacity(self.horizon);
        let mut eta = Array1::from_elem(n, 1.0);
        for t in 0..self.horizon {
            let stage = StageData::from_dataset(ds, t, self.num_a)?;
            let q_t = self.q_estimator.fit_q(&eta, &stage)?;
            let x = stage.x.as_ref().map(|x| x.view());
            let q_vals = q_t.eval(&stage.z.view(), x.as_ref(), &stage.a.view())?;
            log::info!(
                "stage {t}: fitted Q, mean weight {:.4}",
                q_vals.mean().unwrap_or(f64::NAN)
            );
            let next = &eta * &q_vals * stage.eval_match();
            eta_prevs.push(eta);
            eta = next;
            q_fits.push(q_t);
            q_vals_per_stage.push(q_vals);
            stages.push(stage);
        }
        let eta_final = eta;

        // Backward pass: fit H against the discounted bridge targets.
        let mut h_fits_rev = Vec::with_capacity(self.horizon);
        let mut res = Array1::zeros(n);
        let mut band = (0.0f64, 0.0f64);
        for t in (0..self.horizon).rev() {
            let stage = &stages[t];
            let x = stage.x.as_ref().map(|x| x.view());
            let matches = stage.eval_match();
            let y = &stage.r + &(self.gamma * &res);
            let r_min = stage.r.iter().cloned().fold(f64::INFINITY, f64::min);
            let r_max = stage.r.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            band = (r_min + self.gamma * band.0, r_max + self.gamma * band.1);
            let mu = &eta_prevs[t] * &y * &matches;
            let inputs = HStageInputs {
                eta_prev: &eta_prevs[t],
                nu: &eta_prevs[t],
                mu: &mu,
                y: &y,
                h_min: band.0,
                h_max: band.1,
            };
            let h_t = self.h_estimator.fit_h(&inputs, stage)?;
            log::info!("stage {t}: fitted H, target band [{:.4}, {:.4}]", band.0, band.1);

            // Residual handed to the next lower stage.
            let h_obs = h_t.eval(&stage.w.view(), x.as_ref(), &stage.a.view())?;
            let mut h_sum = Array1::zeros(n);
            for action in 0..self.num_a {
                h_sum += &h_t.eval_const_action(&stage.w.view(), x.as_ref(), action)?;
            }
            res = &q_vals_per_stage[t] * &(&matches * &y - &h_obs) + h_sum;
            h_fits_rev.push(h_t);
        }
        h_fits_rev.reverse();

        Ok(FittedNuisances { q: q_fits, h: h_fits_rev, eta_prev: eta_prevs, eta_final })
    }
}
