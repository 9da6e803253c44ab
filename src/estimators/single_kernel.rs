//! estimators::single_kernel — minimax fits with a kernelized adversary and
//! an escalating ridge.
//!
//! Purpose
//! -------
//! Fit one bridge function per stage by minimizing the dual of a kernelized
//! moment game: the adversarial test function is profiled out in closed
//! form through the inverse metric `M = (CᵀC/n + α·L)⁻¹`, leaving a
//! quadratic loss `ρᵀ M ρ` over the critic outputs at the distinct fit
//! tuples. `C` depends on the current fit, so the estimator alternates:
//! freeze the critic, rebuild `M`, re-solve with L-BFGS, repeat `num_rep`
//! times.
//!
//! Key behaviors
//! -------------
//! - Q fits test against the `(w, x, a)` cross set (every distinct past
//!   value paired with every action); H fits test against the observed
//!   `(z, x, a)` tuples. Both reduce to the same core via per-observation
//!   test vectors, so [`fit_minimax`] is shared.
//! - Ridge escalation: when `M` is singular or a round produces non-finite
//!   parameters, the ridge weight steps `0 → 1e-8 → ×10 …` and the fit
//!   restarts from a fresh critic. The loop is bounded by `max_retries`;
//!   exhaustion surfaces as [`EstimError::RetryExhausted`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Importance weights are renormalized to mean one before entering any
//!   moment; H fits rescale `nu` and `mu` by the same constant so their
//!   ratio is preserved.
//! - The kernel is tuned once per fit from the test-tuple embedding and is
//!   held fixed across retries (tuning is deterministic).
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

/// Configuration of the single-kernel estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleKernelConfig {
    pub net: NetKind,
    pub kernel: KernelKind,
    /// Initial ridge weight on the adversary metric; 0 means unregularized
    /// until the first escalation.
    pub alpha: f64,
    /// Alternation rounds between metric rebuilds and critic solves.
    pub num_rep: usize,
    /// Bound on ridge escalations before the fit gives up.
    pub max_retries: usize,
    pub seed: u64,
}

impl Default for SingleKernelConfig {
    fn default() -> Self {
        Self {
            net: NetKind::Linear,
            kernel: KernelKind::TripleMedian,
            alpha: 0.0,
            num_rep: 3,
            max_retries: 20,
            seed: 0,
        }
    }
}

/// Next ridge weight in the escalation schedule.
pub(crate) fn next_alpha(alpha: f64) -> f64 {
    if alpha <= 0.0 { 1e-8 } else { alpha * 10.0 }
}

/// Single-kernel minimax estimator for both bridge directions.
pub struct SingleKernelEstimator {
    cfg: SingleKernelConfig,
    emb: Arc<dyn EmbeddingSet>,
    rng: StdRng,
}

impl SingleKernelEstimator {
    pub fn new(cfg: SingleKernelConfig, emb: Arc<dyn EmbeddingSet>) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, emb, rng }
    }
}

/// Assembled per-stage moment pieces shared by the Q and H directions.
///
/// For observation `i` with fitted value `f_i = critic(fit tuple of i)`:
/// the empirical moment is `ρ = mean_i (t_i · f_i − u_i)`, and the frozen
/// residual matrix has rows `c_i = t_i · f̃_i − u_i`.
struct MinimaxParts {
    /// Per-observation test vectors scaling the fitted value (n × k_test).
    t: Array2<f64>,
    /// Per-observation constant vectors (n × k_test).
    u: Array2<f64>,
    /// Test-tuple Gram matrix, the ridge regularizer (k_test × k_test).
    l: Array2<f64>,
    /// Embedded distinct fit tuples (k_fit × d).
    fit_inputs: Array2<f64>,
    /// Observation → fit-tuple code.
    fit_codes: Vec<usize>,
}

impl MinimaxParts {
    fn n(&self) -> usize {
        self.t.nrows()
    }

    /// `S[:, c] = Σ_{i: fit_code_i = c} t_i`, so that `ρ = S·f/n − c2`.
    fn scatter(&self) -> (Array2<f64>, Array1<f64>) {
        let k_test = self.t.ncols();
        let k_fit = self.fit_inputs.nrows();
        let n = self.n() as f64;
        let mut s = Array2::zeros((k_test, k_fit));
        for (i, &code) in self.fit_codes.iter().enumerate() {
            let mut col = s.column_mut(code);
            col += &self.t.row(i);
        }
        let c2 = self.u.t().dot(&Array1::from_elem(self.n(), 1.0 / n));
        (s, c2)
    }

    /// Residual matrix `C` for the frozen fitted values.
    fn residual_matrix(&self, frozen: &Array1<f64>) -> Array2<f64> {
        let mut c = self.u.clone() * -1.0;
        for (i, &code) in self.fit_codes.iter().enumerate() {
            let mut row = c.row_mut(i);
            row += &(&self.t.row(i) * frozen[code]);
        }
        c
    }
}

/// Dual loss `ρᵀ M ρ` with `ρ = S·f(θ)/n − c2`, solved per alternation
/// round.
struct MinimaxLoss<'a> {
    net: &'a dyn CriticNet,
    s: &'a Array2<f64>,
    c2: &'a Array1<f64>,
    m: &'a Array2<f64>,
    inputs: &'a Array2<f64>,
    n: f64,
}

impl<'a> MinimaxLoss<'a> {
    fn rho(&self, theta: &Theta) -> OptResult<Array1<f64>> {
        let f = self.net.forward_with(theta, &self.inputs.view())?;
        Ok(self.s.dot(&f) / self.n - self.c2)
    }
}

impl<'a> MomentLoss for MinimaxLoss<'a> {
    type Data = ();

    fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
        let rho = self.rho(theta)?;
        Ok(rho.dot(&self.m.dot(&rho)))
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
        // dL/df = (2/n)·Sᵀ·M·ρ (M is symmetric), folded through the critic.
        let rho = self.rho(theta)?;
        let upstream = self.s.t().dot(&self.m.dot(&rho)) * (2.0 / self.n);
        self.net.param_grad(theta, &self.inputs.view(), &upstream)
    }
}

impl SingleKernelEstimator {
    fn solve_options() -> EstimResult<SolveOptions> {
        let tols = Tolerances::new(Some(1e-8), None, Some(250))?;
        Ok(SolveOptions::new(tols, LineSearcher::MoreThuente, None)?)
    }

    /// One full alternation pass at a fixed ridge weight.
    fn fit_rounds(&mut self, parts: &MinimaxParts, alpha: f64) -> EstimResult<Box<dyn CriticNet>> {
        let n = parts.n() as f64;
        let d = parts.fit_inputs.ncols();
        let mut net = self.cfg.net.build(d, &mut self.rng);
        let (s, c2) = parts.scatter();
        let opts = Self::solve_options()?;

        for _ in 0..self.cfg.num_rep.max(1) {
            let frozen = net.forward(&parts.fit_inputs.view());
            let c = parts.residual_matrix(&frozen);
            let metric = c.t().dot(&c) / n + alpha * &parts.l;
            let m = crate::estimators::solve::invert(&metric.view(), "adversary metric")?;
            let loss = MinimaxLoss {
                net: net.as_ref(),
                s: &s,
                c2: &c2,
                m: &m,
                inputs: &parts.fit_inputs,
                n,
            };
            let outcome = minimizer::minimize(&loss, net.params(), &(), &opts)?;
            net.set_params(&outcome.theta_hat)?;
        }

        if !net.is_finite() {
            return Err(EstimError::NonFiniteFit { what: "single-kernel critic parameters" });
        }
        let fitted = net.forward(&parts.fit_inputs.view());
        if fitted.iter().any(|v| !v.is_finite()) {
            return Err(EstimError::NonFiniteFit { what: "single-kernel fitted values" });
        }
        Ok(net)
    }

    /// Bounded ridge-escalation loop around [`fit_rounds`].
    fn fit_minimax(&mut self, parts: &MinimaxParts) -> EstimResult<Box<dyn CriticNet>> {
        let mut alpha = self.cfg.alpha;
        let mut attempts = 0usize;
        loop {
            match self.fit_rounds(parts, alpha) {
                Ok(net) => return Ok(net),
                Err(err) => {
                    attempts += 1;
                    if attempts > self.cfg.max_retries {
                        log::warn!(
                            "single-kernel fit gave up after {attempts} attempts (alpha {alpha:e}): {err}"
                        );
                        return Err(EstimError::RetryExhausted { attempts, last_alpha: alpha });
                    }
                    alpha = next_alpha(alpha);
                    log::debug!("single-kernel fit retrying with alpha {alpha:e} after: {err}");
                }
            }
        }
    }

    fn q_parts(&self, eta: &Array1<f64>, stage: &StageData) -> EstimResult<MinimaxParts> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        let x = stage.x.as_ref().map(|x| x.view());

        // Fit tuples: observed (z, x, a).
        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let fit_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);

        // Test tuples: distinct (w, x) crossed with every action.
        let (w_codes, wa_cross) =
            TupleSet::cross_actions(&stage.w.view(), x.as_ref(), stage.num_a)?;
        let test_inputs = wa_cross.embed(self.emb.as_ref(), ProxyField::W);
        let mut kernel = self.cfg.kernel.build();
        kernel.tune(&test_inputs.view())?;
        let l = kernel.gram(&test_inputs.view(), &test_inputs.view())?;

        let k_test = wa_cross.len();
        let mut t = Array2::zeros((n, k_test));
        let mut u = Array2::zeros((n, k_test));
        for i in 0..n {
            let obs_idx = stage.a[i] + stage.num_a * w_codes[i];
            t.row_mut(i).assign(&(&l.row(obs_idx) * eta[i]));
            let mut all_actions = Array1::zeros(k_test);
            for action in 0..stage.num_a {
                all_actions += &l.row(action + stage.num_a * w_codes[i]);
            }
            u.row_mut(i).assign(&(all_actions * eta[i]));
        }
        Ok(MinimaxParts { t, u, l, fit_inputs, fit_codes: za_codes })
    }

    fn h_parts(
        &self, nu: &Array1<f64>, mu: &Array1<f64>, stage: &StageData,
    ) -> EstimResult<MinimaxParts> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        let x = stage.x.as_ref().map(|x| x.view());

        // Fit tuples: observed (w, x, a).
        let (wa_codes, wa_set) =
            TupleSet::from_observed(&stage.w.view(), x.as_ref(), &stage.a.view())?;
        let fit_inputs = wa_set.embed(self.emb.as_ref(), ProxyField::W);

        // Test tuples: observed (z, x, a).
        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let test_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);
        let mut kernel = self.cfg.kernel.build();
        kernel.tune(&test_inputs.view())?;
        let l = kernel.gram(&test_inputs.view(), &test_inputs.view())?;

        let k_test = za_set.len();
        let mut t = Array2::zeros((n, k_test));
        let mut u = Array2::zeros((n, k_test));
        for i in 0..n {
            t.row_mut(i).assign(&(&l.row(za_codes[i]) * nu[i]));
            u.row_mut(i).assign(&(&l.row(za_codes[i]) * mu[i]));
        }
        Ok(MinimaxParts { t, u, l, fit_inputs, fit_codes: wa_codes })
    }
}

impl QEstimator for SingleKernelEstimator {
    fn fit_q(&mut self, eta_prev: &Array1<f64>, stage: &StageData) -> EstimResult<NuisanceFn> {
        if eta_prev.len() != stage.n() {
            return Err(EstimError::StageLengthMismatch {
                what: "eta_prev",
                expected: stage.n(),
                found: eta_prev.len(),
            });
        }
        let eta = normalize_mean_one(eta_prev, "q-fit importance weights")?;
        let parts = self.q_parts(&eta, stage)?;
        let net = self.fit_minimax(&parts)?;
        Ok(NuisanceFn::from_net(self.emb.clone(), ProxyField::Z, net, 1.0))
    }
}

impl HEstimator for SingleKernelEstimator {
    fn fit_h(&mut self, inputs: &HStageInputs<'_>, stage: &StageData) -> EstimResult<NuisanceFn> {
        if inputs.nu.len() != stage.n() || inputs.mu.len() != stage.n() {
            return Err(EstimError::StageLengthMismatch {
                what: "h-fit weights",
                expected: stage.n(),
                found: inputs.nu.len(),
            });
        }
        // Rescale nu and mu by the same constant so their ratio survives.
        let mean = inputs.nu.mean().unwrap_or(0.0);
        if !mean.is_finite() || mean <= 0.0 {
            return Err(EstimError::NonFiniteFit { what: "h-fit importance weights" });
        }
        let nu = inputs.nu / mean;
        let mu = inputs.mu / mean;
        let parts = self.h_parts(&nu, &mu, stage)?;
        let net = self.fit_minimax(&parts)?;
        Ok(NuisanceFn::from_net(self.emb.clone(), ProxyField::W, net, 1.0))
    }
}
