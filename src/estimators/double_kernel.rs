//! estimators::double_kernel — closed-form RKHS fits with a kernelized
//! adversary.
//!
//! Purpose
//! -------
//! Fit the bridge function itself in an RKHS instead of through a
//! parametric critic. With the fitted function expanded over the distinct
//! fit tuples, `f(·) = Σ_c β_c·k(·, tuple_c)`, the profiled moment game
//! becomes linear in `β` and each round solves the regularized normal
//! equations
//!
//!   (Ωᵀ M Ω + λ·L_fit) β = Ωᵀ M c
//!
//! where `M = (CᵀC/n + α·L_test)⁻¹` is the adversary metric, `Ω` pairs the
//! test and fit Gram rows across observations, and `c` collects the
//! counterfactual targets. `C` depends on the current fitted values, so the
//! estimator iterates a short fixed point seeded with the constant
//! function 1.
//!
//! Key behaviors
//! -------------
//! - Two kernels per direction: one induces the adversary class over the
//!   test tuples, one the fit class over the observed tuples. Both are
//!   tuned per stage by the median heuristic.
//! - Singular metrics or normal equations surface as
//!   [`EstimError::SingularSystem`]; the ridges `alpha` and `lambda` are
//!   fixed configuration, not escalated.
//! - The result is a [`NuisanceFn`] in RKHS form, carrying its tuned kernel
//!   and support so evaluation works at unseen tuples.
use std::sync::Arc;

use ndarray::{Array1, Array2};

use crate::data::dataset::StageData;
use crate::data::embedding::EmbeddingSet;
use crate::estimators::errors::{EstimError, EstimResult};
use crate::estimators::solve::{invert, solve_vector};
use crate::estimators::traits::{
    HEstimator, HStageInputs, NuisanceFn, ProxyField, QEstimator, TupleSet, normalize_mean_one,
};
use crate::kernels::{KernelKind, PsdKernel};

/// Configuration of the double-kernel estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoubleKernelConfig {
    /// Kernel inducing the class of the fitted function.
    pub fit_kernel: KernelKind,
    /// Kernel inducing the adversary class.
    pub adv_kernel: KernelKind,
    /// Ridge on the adversary metric.
    pub alpha: f64,
    /// Ridge on the RKHS norm of the fit.
    pub lambda: f64,
    /// Fixed-point rounds between metric rebuilds and closed-form solves.
    pub num_rep: usize,
}

impl Default for DoubleKernelConfig {
    fn default() -> Self {
        Self {
            fit_kernel: KernelKind::TripleMedian,
            adv_kernel: KernelKind::TripleMedian,
            alpha: 1e-6,
            lambda: 1e-6,
            num_rep: 3,
        }
    }
}

/// Double-kernel estimator for both bridge directions.
pub struct DoubleKernelEstimator {
    cfg: DoubleKernelConfig,
    emb: Arc<dyn EmbeddingSet>,
}

impl DoubleKernelEstimator {
    pub fn new(cfg: DoubleKernelConfig, emb: Arc<dyn EmbeddingSet>) -> Self {
        Self { cfg, emb }
    }
}

/// Assembled per-stage pieces of one RKHS fit.
///
/// For observation `i` with fitted value `f_i = L_fit[code_i, :]·β`: the
/// empirical moment is `ρ = mean_i (t_i·f_i − u_i)` in the test-Gram basis
/// and the frozen residual matrix has rows `c_i = t_i·f̃_i − u_i`.
struct RkhsParts {
    t: Array2<f64>,
    u: Array2<f64>,
    l_test: Array2<f64>,
    l_fit: Array2<f64>,
    fit_codes: Vec<usize>,
    fit_support: Array2<f64>,
    fit_kernel: Box<dyn PsdKernel>,
}

impl DoubleKernelEstimator {
    /// Short fixed point: rebuild the adversary metric at the current
    /// fitted values, then solve the normal equations for `β`.
    fn solve_beta(&self, parts: &RkhsParts) -> EstimResult<Array1<f64>> {
        let n = parts.t.nrows();
        let n_f = n as f64;
        let k_test = parts.l_test.nrows();
        let k_fit = parts.l_fit.nrows();

        let mut omega = Array2::zeros((k_test, k_fit));
        for (i, &code) in parts.fit_codes.iter().enumerate() {
            let t_i = parts.t.row(i);
            let l_c = parts.l_fit.row(code);
            for r in 0..k_test {
                for s in 0..k_fit {
                    omega[(r, s)] += t_i[r] * l_c[s];
                }
            }
        }
        omega /= n_f;
        let c = parts.u.t().dot(&Array1::from_elem(n, 1.0 / n_f));

        // Constant seed for the fixed point.
        let mut fitted = Array1::from_elem(k_fit, 1.0);
        let mut beta = Array1::zeros(k_fit);
        for _ in 0..self.cfg.num_rep.max(1) {
            let mut resid = parts.u.clone() * -1.0;
            for (i, &code) in parts.fit_codes.iter().enumerate() {
                let mut row = resid.row_mut(i);
                row += &(&parts.t.row(i) * fitted[code]);
            }
            let metric = resid.t().dot(&resid) / n_f + self.cfg.alpha * &parts.l_test;
            let m = invert(&metric.view(), "adversary metric")?;
            let mo = m.dot(&omega);
            let lhs = omega.t().dot(&mo) + self.cfg.lambda * &parts.l_fit;
            let rhs = omega.t().dot(&m.dot(&c));
            beta = solve_vector(&lhs.view(), &rhs, "double-kernel normal equations")?;
            fitted = parts.l_fit.dot(&beta);
            if fitted.iter().any(|v| !v.is_finite()) {
                return Err(EstimError::NonFiniteFit { what: "double-kernel fitted values" });
            }
        }
        Ok(beta)
    }

    fn q_parts(&self, eta: &Array1<f64>, stage: &StageData) -> EstimResult<RkhsParts> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        let x = stage.x.as_ref().map(|x| x.view());

        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let fit_support = za_set.embed(self.emb.as_ref(), ProxyField::Z);
        let mut fit_kernel = self.cfg.fit_kernel.build();
        fit_kernel.tune(&fit_support.view())?;
        let l_fit = fit_kernel.gram(&fit_support.view(), &fit_support.view())?;

        let (w_codes, wa_cross) =
            TupleSet::cross_actions(&stage.w.view(), x.as_ref(), stage.num_a)?;
        let test_inputs = wa_cross.embed(self.emb.as_ref(), ProxyField::W);
        let mut adv_kernel = self.cfg.adv_kernel.build();
        adv_kernel.tune(&test_inputs.view())?;
        let l_test = adv_kernel.gram(&test_inputs.view(), &test_inputs.view())?;

        let k_test = wa_cross.len();
        let mut t = Array2::zeros((n, k_test));
        let mut u = Array2::zeros((n, k_test));
        for i in 0..n {
            let obs_idx = stage.a[i] + stage.num_a * w_codes[i];
            t.row_mut(i).assign(&(&l_test.row(obs_idx) * eta[i]));
            let mut all_actions = Array1::zeros(k_test);
            for action in 0..stage.num_a {
                all_actions += &l_test.row(action + stage.num_a * w_codes[i]);
            }
            u.row_mut(i).assign(&(all_actions * eta[i]));
        }
        Ok(RkhsParts { t, u, l_test, l_fit, fit_codes: za_codes, fit_support, fit_kernel })
    }

    fn h_parts(
        &self, nu: &Array1<f64>, mu: &Array1<f64>, stage: &StageData,
    ) -> EstimResult<RkhsParts> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        let x = stage.x.as_ref().map(|x| x.view());

        let (wa_codes, wa_set) =
            TupleSet::from_observed(&stage.w.view(), x.as_ref(), &stage.a.view())?;
        let fit_support = wa_set.embed(self.emb.as_ref(), ProxyField::W);
        let mut fit_kernel = self.cfg.fit_kernel.build();
        fit_kernel.tune(&fit_support.view())?;
        let l_fit = fit_kernel.gram(&fit_support.view(), &fit_support.view())?;

        let (za_codes, za_set) =
            TupleSet::from_observed(&stage.z.view(), x.as_ref(), &stage.a.view())?;
        let test_inputs = za_set.embed(self.emb.as_ref(), ProxyField::Z);
        let mut adv_kernel = self.cfg.adv_kernel.build();
        adv_kernel.tune(&test_inputs.view())?;
        let l_test = adv_kernel.gram(&test_inputs.view(), &test_inputs.view())?;

        let k_test = za_set.len();
        let mut t = Array2::zeros((n, k_test));
        let mut u = Array2::zeros((n, k_test));
        for i in 0..n {
            t.row_mut(i).assign(&(&l_test.row(za_codes[i]) * nu[i]));
            u.row_mut(i).assign(&(&l_test.row(za_codes[i]) * mu[i]));
        }
        Ok(RkhsParts { t, u, l_test, l_fit, fit_codes: wa_codes, fit_support, fit_kernel })
    }
}

impl QEstimator for DoubleKernelEstimator {
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
        let beta = self.solve_beta(&parts)?;
        Ok(NuisanceFn::rkhs(
            self.emb.clone(),
            ProxyField::Z,
            parts.fit_kernel,
            parts.fit_support,
            beta,
        ))
    }
}

impl HEstimator for DoubleKernelEstimator {
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
        let parts = self.h_parts(&nu, &mu, stage)?;
        let beta = self.solve_beta(&parts)?;
        Ok(NuisanceFn::rkhs(
            self.emb.clone(),
            ProxyField::W,
            parts.fit_kernel,
            parts.fit_support,
            beta,
        ))
    }
}
