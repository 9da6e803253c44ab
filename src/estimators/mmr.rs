//! estimators::mmr — maximum moment restriction fits.
//!
//! Purpose
//! -------
//! Fit a bridge function by minimizing the RKHS norm of the empirical
//! moment directly, without profiling out an adversary. Expanding the norm
//! gives a convex quadratic in the fitted values at the unique covariate
//! tuples, `V(f) = (fᵀ G f − 2 bᵀ f) / n²` up to a constant. Observations
//! enter through an index matrix `J` that accumulates their weights onto
//! their unique tuple's row, so `G = J L Jᵀ` and `b = J L j₂` where `L` is
//! the kernel Gram over the test set; the assembly scales with the unique
//! tuple count, not with n². One L-BFGS pass solves the quadratic; there
//! is no alternation and no ridge escalation.
//!
//! Key behaviors
//! -------------
//! - A fixed ridge is added to the Gram diagonal before pairing so that
//!   near-duplicate covariate rows cannot make the quadratic degenerate.
//! - Q and H directions share [`fit_quadratic`]; they differ only in how
//!   `J` and `j₂` are assembled.
//!
//! Downstream usage
//! ----------------
//! Fitted functions are returned without rescaling. The normalized
//! variant the joint game trainer pretrains with lives in the
//! `discrete_mmr` module.
use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::critics::{CriticNet, NetKind};
use crate::data::dataset::StageData;
use crate::data::embedding::EmbeddingSet;
use crate::estimators::errors::{EstimError, EstimResult};
use crate::estimators::traits::{
    HEstimator, HStageInputs, NuisanceFn, ProxyField, QEstimator, TupleSet, normalize_mean_one,
};
use crate::kernels::KernelKind;
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::{self, Cost, Grad, LineSearcher, MomentLoss, SolveOptions, Theta, Tolerances},
};

/// Configuration of the MMR estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrConfig {
    pub net: NetKind,
    pub kernel: KernelKind,
    /// Ridge added to the Gram diagonal before pairing.
    pub ridge: f64,
    pub seed: u64,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self { net: NetKind::Linear, kernel: KernelKind::TripleMedian, ridge: 1e-1, seed: 0 }
    }
}

/// Maximum moment restriction estimator for both bridge directions.
pub struct MmrEstimator {
    cfg: MmrConfig,
    emb: Arc<dyn EmbeddingSet>,
    rng: StdRng,
}

impl MmrEstimator {
    pub fn new(cfg: MmrConfig, emb: Arc<dyn EmbeddingSet>) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, emb, rng }
    }

    /// Tune the configured kernel on `inputs` and return its ridged Gram.
    fn ridged_gram(&self, inputs: &Array2<f64>) -> EstimResult<Array2<f64>> {
        let mut kernel = self.cfg.kernel.build();
        kernel.tune(&inputs.view())?;
        let mut gram = kernel.gram(&inputs.view(), &inputs.view())?;
        for i in 0..gram.nrows() {
            gram[(i, i)] += self.cfg.ridge;
        }
        Ok(gram)
    }
}

/// Assembled quadratic `(fᵀ G f − 2 bᵀ f) / n²` over fitted values at the
/// unique fit tuples, `f_u = critic(unique tuple u)`. Observation weights
/// are already folded into `G` and `b` through the index matrices.
struct MmrQuadratic {
    g: Array2<f64>,
    b: Array1<f64>,
    fit_inputs: Array2<f64>,
    n: usize,
}

struct MmrLoss<'a> {
    net: &'a dyn CriticNet,
    quad: &'a MmrQuadratic,
}

impl<'a> MomentLoss for MmrLoss<'a> {
    type Data = ();

    fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
        let f = self.net.forward_with(theta, &self.quad.fit_inputs.view())?;
        let n2 = (self.quad.n * self.quad.n) as f64;
        Ok((f.dot(&self.quad.g.dot(&f)) - 2.0 * self.quad.b.dot(&f)) / n2)
    }

    fn check(&self, theta: &Theta, _data: &()) -> OptResult<()> {
        for (index, &value) in theta.iter().enumerate() {
            if !value.is_finite() {
                return Err(OptError::InvalidThetaInput { index, value });
            }
        }
        Ok(())
    }

    fn grad(&self, theta: &Theta, _data: &()) -> OptResult<Grad> {
        let f = self.net.forward_with(theta, &self.quad.fit_inputs.view())?;
        let n2 = (self.quad.n * self.quad.n) as f64;
        let upstream = (self.quad.g.dot(&f) - &self.quad.b) * (2.0 / n2);
        self.net.param_grad(theta, &self.quad.fit_inputs.view(), &upstream)
    }
}

impl MmrEstimator {
    fn fit_quadratic(&mut self, quad: &MmrQuadratic) -> EstimResult<Box<dyn CriticNet>> {
        let d = quad.fit_inputs.ncols();
        let mut net = self.cfg.net.build(d, &mut self.rng);
        let tols = Tolerances::new(Some(1e-8), None, Some(250))?;
        let opts = SolveOptions::new(tols, LineSearcher::MoreThuente, None)?;
        let loss = MmrLoss { net: net.as_ref(), quad };
        let outcome = minimizer::minimize(&loss, net.params(), &(), &opts)?;
        net.set_params(&outcome.theta_hat)?;
        if !net.is_finite() {
            return Err(EstimError::NonFiniteFit { what: "MMR critic parameters" });
        }
        Ok(net)
    }

    fn q_quadratic(&self, eta: &Array1<f64>, stage: &StageData) -> EstimResult<MmrQuadratic> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        let x = stage.x.as_ref().map(|x| x.view());

        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let fit_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);

        // The moment lives in the RKHS over the (w, x) x action cross set;
        // observed tuples sit at index a + num_a * code(w).
        let (w_codes, wa_cross) =
            TupleSet::cross_actions(&stage.w.view(), x.as_ref(), stage.num_a)?;
        let test_inputs = wa_cross.embed(self.emb.as_ref(), ProxyField::W);
        let l = self.ridged_gram(&test_inputs)?;

        // Index matrix: row u accumulates the eta weights of observations
        // whose fit tuple deduplicated to u, at their cross-set column.
        // j2 sweeps every action for each observation, which carries the
        // counterfactual side of the moment.
        let mut j = Array2::zeros((fit_inputs.nrows(), test_inputs.nrows()));
        let mut j2 = Array1::zeros(test_inputs.nrows());
        for i in 0..n {
            j[(za_codes[i], stage.a[i] + stage.num_a * w_codes[i])] += eta[i];
            for action in 0..stage.num_a {
                j2[action + stage.num_a * w_codes[i]] += eta[i];
            }
        }
        let jl = j.dot(&l);
        let g = jl.dot(&j.t());
        let b = jl.dot(&j2);
        Ok(MmrQuadratic { g, b, fit_inputs, n })
    }

    fn h_quadratic(
        &self, nu: &Array1<f64>, mu: &Array1<f64>, stage: &StageData,
    ) -> EstimResult<MmrQuadratic> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        let x = stage.x.as_ref().map(|x| x.view());

        let (wa_codes, wa_set) =
            TupleSet::from_observed(&stage.w.view(), x.as_ref(), &stage.a.view())?;
        let fit_inputs = wa_set.embed(self.emb.as_ref(), ProxyField::W);

        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let test_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);
        let l = self.ridged_gram(&test_inputs)?;

        // Index matrix: nu weights accumulate per unique (w, x, a) fit
        // tuple at the test tuple's column; j2 carries the mu targets.
        let mut j = Array2::zeros((fit_inputs.nrows(), test_inputs.nrows()));
        let mut j2 = Array1::zeros(test_inputs.nrows());
        for i in 0..n {
            j[(wa_codes[i], za_codes[i])] += nu[i];
            j2[za_codes[i]] += mu[i];
        }
        let jl = j.dot(&l);
        let g = jl.dot(&j.t());
        let b = jl.dot(&j2);
        Ok(MmrQuadratic { g, b, fit_inputs, n })
    }
}

impl QEstimator for MmrEstimator {
    fn fit_q(&mut self, eta_prev: &Array1<f64>, stage: &StageData) -> EstimResult<NuisanceFn> {
        if eta_prev.len() != stage.n() {
            return Err(EstimError::StageLengthMismatch {
                what: "eta_prev",
                expected: stage.n(),
                found: eta_prev.len(),
            });
        }
        let eta = normalize_mean_one(eta_prev, "q-fit importance weights")?;
        let quad = self.q_quadratic(&eta, stage)?;
        let net = self.fit_quadratic(&quad)?;
        Ok(NuisanceFn::from_net(self.emb.clone(), ProxyField::Z, net, 1.0))
    }
}

impl HEstimator for MmrEstimator {
    fn fit_h(&mut self, inputs: &HStageInputs<'_>, stage: &StageData) -> EstimResult<NuisanceFn> {
        if inputs.nu.len() != stage.n() || inputs.mu.len() != stage.n() {
            return Err(EstimError::StageLengthMismatch {
                what: "h-fit weights",
                expected: stage.n(),
                found: inputs.nu.len(),
            });
        }
        let mean = inputs.nu.mean().unwrap_or(0.0);
        if !mean.is_finite() || mean <= 0.0 {
            return Err(EstimError::NonFiniteFit { what: "h-fit importance weights" });
        }
        let nu = inputs.nu / mean;
        let mu = inputs.mu / mean;
        let quad = self.h_quadratic(&nu, &mu, stage)?;
        let net = self.fit_quadratic(&quad)?;
        Ok(NuisanceFn::from_net(self.emb.clone(), ProxyField::W, net, 1.0))
    }
}
