//! estimators::discrete_mmr — normalized MMR fits over deduplicated tuples.
//!
//! Purpose
//! -------
//! A variant of the moment-norm fit specialized to discrete covariate
//! spaces. Both the fitted function and the kernel test set live on the
//! deduplicated tuples, so every matrix in the quadratic is indexed by
//! unique codes; observations enter only through frequency vectors. After
//! the solve, the fitted function is divided by a data-driven
//! normalization: Q fits divide by the calibrated weighted mean
//! `reg_freqs · q` (which a true Q-bridge pins at one), H fits by the
//! weighted mean `freqs · h`. The joint game trainer pretrains with this
//! estimator.
//!
//! Key behaviors
//! -------------
//! - The moment residual is `ρ = B·f − c` over the test tuples, scored as
//!   `ρᵀ K ρ` with a fixed ridge on the test Gram.
//! - Three penalties with per-direction weights: a frequency-weighted
//!   shrinkage on the fitted values, a weighted-mean anchor, and a third
//!   term that differs by direction (Q: calibration of the eta-weighted
//!   matched mean to one; H: frequency-weighted band excess).
//! - Normalization happens after the solve; a vanishing normalizer is
//!   reported as [`EstimError::NonFiniteFit`] instead of dividing through.
//!
//! Downstream usage
//! ----------------
//! The warm starts of the joint game read the raw critic through
//! [`NuisanceFn::critic`]; the normalization only affects evaluation.
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

/// Configuration of the normalized discrete MMR estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteMmrConfig {
    pub net: NetKind,
    pub kernel: KernelKind,
    /// Ridge added to the test Gram diagonal.
    pub ridge: f64,
    /// Q penalty weights: (shrinkage, mean anchor, calibration).
    pub q_lmbda: (f64, f64, f64),
    /// H penalty weights: (shrinkage, mean anchor, band).
    pub h_lmbda: (f64, f64, f64),
    pub seed: u64,
}

impl Default for DiscreteMmrConfig {
    fn default() -> Self {
        Self {
            net: NetKind::Linear,
            kernel: KernelKind::TripleMedian,
            ridge: 1e-1,
            q_lmbda: (1e-3, 1.0, 1.0),
            h_lmbda: (1e-3, 1.0, 1.0),
            seed: 0,
        }
    }
}

/// Normalized MMR estimator for both bridge directions.
pub struct DiscreteMmrEstimator {
    cfg: DiscreteMmrConfig,
    emb: Arc<dyn EmbeddingSet>,
    rng: StdRng,
}

impl DiscreteMmrEstimator {
    pub fn new(cfg: DiscreteMmrConfig, emb: Arc<dyn EmbeddingSet>) -> Self {
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

/// Direction-specific third penalty of the objective.
enum ThirdPenalty {
    /// `(weights · f − target)²`: calibrates the eta-weighted matched mean.
    Calibrate { weights: Array1<f64>, target: f64 },
    /// `Σ obs_freqs · (relu(f − hi) + relu(lo − f))²`: frequency-weighted
    /// excess outside the plausible band.
    Band { lo: f64, hi: f64 },
}

/// Assembled objective `ρᵀ K ρ + penalties` over fitted values at the
/// unique fit tuples, with `ρ = B·f − c` living on the test tuples.
struct NormalizedQuadratic {
    fit_inputs: Array2<f64>,
    k: Array2<f64>,
    b: Array2<f64>,
    c: Array1<f64>,
    /// Unweighted visit frequency per fit tuple.
    obs_freqs: Array1<f64>,
    /// Eta-weighted visit frequency per fit tuple.
    freqs: Array1<f64>,
    mean_tgt: f64,
    third: ThirdPenalty,
    lmbda: (f64, f64, f64),
}

struct NormalizedMmrLoss<'a> {
    net: &'a dyn CriticNet,
    quad: &'a NormalizedQuadratic,
}

impl<'a> MomentLoss for NormalizedMmrLoss<'a> {
    type Data = ();

    fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
        let q = self.quad;
        let f = self.net.forward_with(theta, &q.fit_inputs.view())?;
        let rho = q.b.dot(&f) - &q.c;
        let (l0, l1, l2) = q.lmbda;
        let shrink = f.mapv(|v| v * v).dot(&q.obs_freqs);
        let mean_gap = q.freqs.dot(&f) - q.mean_tgt;
        let third = match &q.third {
            ThirdPenalty::Calibrate { weights, target } => {
                let gap = weights.dot(&f) - target;
                gap * gap
            }
            ThirdPenalty::Band { lo, hi } => {
                let mut acc = 0.0;
                for (i, &v) in f.iter().enumerate() {
                    let excess = (v - hi).max(0.0) + (lo - v).max(0.0);
                    acc += q.obs_freqs[i] * excess * excess;
                }
                acc
            }
        };
        Ok(rho.dot(&q.k.dot(&rho)) + l0 * shrink + l1 * mean_gap * mean_gap + l2 * third)
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
        let q = self.quad;
        let f = self.net.forward_with(theta, &q.fit_inputs.view())?;
        let rho = q.b.dot(&f) - &q.c;
        let (l0, l1, l2) = q.lmbda;
        let mut upstream = q.b.t().dot(&q.k.dot(&rho)) * 2.0;
        upstream += &(&(&q.obs_freqs * &f) * (2.0 * l0));
        let mean_gap = q.freqs.dot(&f) - q.mean_tgt;
        upstream += &(&q.freqs * (2.0 * l1 * mean_gap));
        match &q.third {
            ThirdPenalty::Calibrate { weights, target } => {
                let gap = weights.dot(&f) - target;
                upstream += &(weights * (2.0 * l2 * gap));
            }
            ThirdPenalty::Band { lo, hi } => {
                for (i, &v) in f.iter().enumerate() {
                    let over = (v - hi).max(0.0);
                    let under = (lo - v).max(0.0);
                    upstream[i] += 2.0 * l2 * q.obs_freqs[i] * (over - under);
                }
            }
        }
        self.net.param_grad(theta, &q.fit_inputs.view(), &upstream)
    }
}

impl DiscreteMmrEstimator {
    fn fit_net(&mut self, quad: &NormalizedQuadratic) -> EstimResult<Box<dyn CriticNet>> {
        let d = quad.fit_inputs.ncols();
        let mut net = self.cfg.net.build(d, &mut self.rng);
        let tols = Tolerances::new(Some(1e-8), None, Some(250))?;
        let opts = SolveOptions::new(tols, LineSearcher::MoreThuente, None)?;
        let loss = NormalizedMmrLoss { net: net.as_ref(), quad };
        let outcome = minimizer::minimize(&loss, net.params(), &(), &opts)?;
        net.set_params(&outcome.theta_hat)?;
        if !net.is_finite() {
            return Err(EstimError::NonFiniteFit { what: "normalized MMR critic parameters" });
        }
        Ok(net)
    }
}

impl QEstimator for DiscreteMmrEstimator {
    fn fit_q(&mut self, eta_prev: &Array1<f64>, stage: &StageData) -> EstimResult<NuisanceFn> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        if eta_prev.len() != n {
            return Err(EstimError::StageLengthMismatch {
                what: "eta_prev",
                expected: n,
                found: eta_prev.len(),
            });
        }
        let eta = normalize_mean_one(eta_prev, "q-fit importance weights")?;
        let x = stage.x.as_ref().map(|x| x.view());

        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let fit_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);
        let u = fit_inputs.nrows();

        let (w_codes, wa_cross) =
            TupleSet::cross_actions(&stage.w.view(), x.as_ref(), stage.num_a)?;
        let test_inputs = wa_cross.embed(self.emb.as_ref(), ProxyField::W);
        let m = test_inputs.nrows();
        let k = self.ridged_gram(&test_inputs)?;

        // B counts observed (test tuple, fit tuple) pairs; c sweeps every
        // action per observation, carrying the counterfactual side.
        let matches = stage.eval_match();
        let nf = n as f64;
        let mut b = Array2::zeros((m, u));
        let mut c = Array1::zeros(m);
        let mut freqs = Array1::zeros(u);
        let mut reg_freqs = Array1::zeros(u);
        let mut obs_freqs = Array1::zeros(u);
        for i in 0..n {
            b[(stage.a[i] + stage.num_a * w_codes[i], za_codes[i])] += 1.0 / nf;
            for action in 0..stage.num_a {
                c[action + stage.num_a * w_codes[i]] += 1.0 / nf;
            }
            freqs[za_codes[i]] += eta[i] / nf;
            reg_freqs[za_codes[i]] += eta[i] * matches[i] / nf;
            obs_freqs[za_codes[i]] += 1.0 / nf;
        }

        let quad = NormalizedQuadratic {
            fit_inputs,
            k,
            b,
            c,
            obs_freqs,
            freqs,
            mean_tgt: stage.num_a as f64,
            third: ThirdPenalty::Calibrate { weights: reg_freqs.clone(), target: 1.0 },
            lmbda: self.cfg.q_lmbda,
        };
        let net = self.fit_net(&quad)?;
        let norm = reg_freqs.dot(&net.forward(&quad.fit_inputs.view()));
        if !norm.is_finite() || norm.abs() < 1e-12 {
            return Err(EstimError::NonFiniteFit { what: "q-fit calibration normalizer" });
        }
        Ok(NuisanceFn::from_net(self.emb.clone(), ProxyField::Z, net, norm))
    }
}

impl HEstimator for DiscreteMmrEstimator {
    fn fit_h(&mut self, inputs: &HStageInputs<'_>, stage: &StageData) -> EstimResult<NuisanceFn> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        if inputs.eta_prev.len() != n || inputs.y.len() != n {
            return Err(EstimError::StageLengthMismatch {
                what: "h-fit weights",
                expected: n,
                found: inputs.eta_prev.len(),
            });
        }
        let eta = normalize_mean_one(inputs.eta_prev, "h-fit importance weights")?;
        let x = stage.x.as_ref().map(|x| x.view());

        let (wa_codes, wa_set) =
            TupleSet::from_observed(&stage.w.view(), x.as_ref(), &stage.a.view())?;
        let fit_inputs = wa_set.embed(self.emb.as_ref(), ProxyField::W);
        let u = fit_inputs.nrows();

        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let test_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);
        let m = test_inputs.nrows();
        let k = self.ridged_gram(&test_inputs)?;

        // c carries the matched targets y·1{a = e} per test tuple.
        let matches = stage.eval_match();
        let nf = n as f64;
        let mut b = Array2::zeros((m, u));
        let mut c = Array1::zeros(m);
        let mut freqs = Array1::zeros(u);
        let mut obs_freqs = Array1::zeros(u);
        let mut tgt_sum = 0.0;
        for i in 0..n {
            b[(za_codes[i], wa_codes[i])] += 1.0 / nf;
            let tgt = inputs.y[i] * matches[i];
            c[za_codes[i]] += tgt / nf;
            tgt_sum += tgt;
            freqs[wa_codes[i]] += eta[i] / nf;
            obs_freqs[wa_codes[i]] += 1.0 / nf;
        }

        let (lo, hi) = if inputs.h_min <= inputs.h_max {
            (inputs.h_min, inputs.h_max)
        } else {
            (inputs.h_max, inputs.h_min)
        };
        let quad = NormalizedQuadratic {
            fit_inputs,
            k,
            b,
            c,
            obs_freqs,
            freqs: freqs.clone(),
            mean_tgt: tgt_sum / nf,
            third: ThirdPenalty::Band { lo, hi },
            lmbda: self.cfg.h_lmbda,
        };
        let net = self.fit_net(&quad)?;
        let norm = freqs.dot(&net.forward(&quad.fit_inputs.view()));
        if !norm.is_finite() || norm.abs() < 1e-12 {
            return Err(EstimError::NonFiniteFit { what: "h-fit mean normalizer" });
        }
        Ok(NuisanceFn::from_net(self.emb.clone(), ProxyField::W, net, norm))
    }
}
