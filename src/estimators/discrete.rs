//! estimators::discrete — tabular fits for discrete proxy spaces.
//!
//! Purpose
//! -------
//! When the proxies take finitely many integer levels, the bridge functions
//! are tables: one value per (proxy level, action) cell. This estimator
//! builds floored empirical conditional tables and fits the cells against a
//! penalized least-squares objective instead of running a kernel game.
//!
//! Key behaviors
//! -------------
//! - Proxy columns must be integer-valued; fractional values surface as
//!   [`EstimError::NonDiscreteProxy`] before any counting.
//! - Probability tables pass through [`safe_normalize`], which mixes in a
//!   uniform floor so empty or rare cells cannot produce infinite targets.
//! - The objective adds four penalties to the frequency-weighted squared
//!   moment residuals: a frequency-weighted L2 shrinkage on cells, a
//!   mean-matching term pinning the observed average to its analytic value,
//!   a small plain L2 term, and a frequency-weighted squared-relu band
//!   penalty keeping cells inside their plausible range.
//!   For Q fits the band ceiling per action `a` is the largest floored
//!   inverse propensity `1/p(a|w)` over past levels; for H fits the band is
//!   the discounted reward range supplied by the caller.
//! - L-BFGS solves the objective; when it fails the estimator falls back to
//!   a long Adam loop with periodic evaluation, early stopping on a flat
//!   stretch, and best-seen restoration.
//!
//! Conventions
//! -----------
//! - Proxy level codes come from the embedding itself (argmax of the
//!   one-hot row), so table indices always agree with how the fitted
//!   [`NuisanceFn`] will embed evaluation inputs.
//! - Table parameters are laid out action-major: `θ[a·k + level]`.
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::critics::{CriticNet, TabularNet};
use crate::data::dataset::StageData;
use crate::data::embedding::EmbeddingSet;
use crate::estimators::errors::{EstimError, EstimResult};
use crate::estimators::traits::{
    HEstimator, HStageInputs, NuisanceFn, ProxyField, QEstimator, normalize_mean_one,
};
use crate::optimization::{
    errors::{OptError, OptResult},
    first_order::{Adam, FirstOrderConfig},
    minimizer::{self, Cost, Grad, LineSearcher, MomentLoss, SolveOptions, Theta, Tolerances},
};

/// Configuration of the discrete tabular estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteConfig {
    /// Uniform floor mixed into every probability table.
    pub eps: f64,
    /// Weight of the frequency-weighted L2 shrinkage on table cells.
    pub freq_l2_pen: f64,
    /// Weight of the plain L2 penalty on table cells.
    pub l2_pen: f64,
    /// Weight of the mean-matching penalty.
    pub mean_pen: f64,
    /// Weight of the band penalty.
    pub band_pen: f64,
    /// Learning rate of the Adam fallback loop.
    pub fallback_lr: f64,
    /// Step budget of the Adam fallback loop.
    pub fallback_iters: usize,
    /// Evaluation cadence inside the fallback loop.
    pub eval_every: usize,
    /// Number of flat evaluations tolerated before early stop.
    pub patience: usize,
    /// Improvement below this slack counts as flat.
    pub improve_slack: f64,
    pub seed: u64,
}

impl Default for DiscreteConfig {
    fn default() -> Self {
        Self {
            eps: 1e-2,
            freq_l2_pen: 1e-4,
            l2_pen: 1e-4,
            mean_pen: 1.0,
            band_pen: 1.0,
            fallback_lr: 5e-2,
            fallback_iters: 100_000,
            eval_every: 1000,
            patience: 5,
            improve_slack: 1e-3,
            seed: 0,
        }
    }
}

/// Tabular estimator for discrete proxy spaces.
pub struct DiscreteEstimator {
    cfg: DiscreteConfig,
    emb: Arc<dyn EmbeddingSet>,
    rng: StdRng,
}

impl DiscreteEstimator {
    pub fn new(cfg: DiscreteConfig, emb: Arc<dyn EmbeddingSet>) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, emb, rng }
    }
}

/// Mix a uniform floor into a nonnegative weight vector and renormalize.
///
/// A zero-mass vector becomes exactly uniform.
pub(crate) fn safe_normalize(v: &ArrayView1<f64>, eps: f64) -> Array1<f64> {
    let k = v.len() as f64;
    let total: f64 = v.sum();
    let base = if total > 0.0 { v / total } else { Array1::from_elem(v.len(), 1.0 / k) };
    (base + eps) / (1.0 + eps * k)
}

fn check_discrete(field: &'static str, col: &ArrayView1<f64>) -> EstimResult<()> {
    for (index, &value) in col.iter().enumerate() {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(EstimError::NonDiscreteProxy { field, index, value });
        }
    }
    Ok(())
}

/// Level codes straight from the one-hot embedding, so table indices match
/// the embedding the fitted function will use at evaluation time.
fn codes_from_rows(rows: &Array2<f64>) -> Vec<usize> {
    rows.rows()
        .into_iter()
        .map(|row| {
            let mut best = 0usize;
            let mut best_val = f64::NEG_INFINITY;
            for (j, &v) in row.iter().enumerate() {
                if v > best_val {
                    best_val = v;
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// Penalized least-squares objective over table cells.
///
/// `value = Σ_r wgt_r·(coef_r·θ − tgt_r)²
///          + freq_l2_pen·Σ freq·θ²
///          + mean_pen·(freq·θ − mean_tgt)²
///          + l2_pen·mean(θ²)
///          + band_pen·Σ(freq·(relu(θ−hi) + relu(lo−θ)))²`
///
/// `freq` is the floored empirical visit frequency of each table cell; it
/// weights the shrinkage, mean, and band penalties so rarely visited cells
/// exert little pressure on the fit.
struct TableLoss {
    coef: Array2<f64>,
    tgt: Array1<f64>,
    wgt: Array1<f64>,
    freq: Array1<f64>,
    mean_tgt: f64,
    lo: Array1<f64>,
    hi: Array1<f64>,
    freq_l2_pen: f64,
    l2_pen: f64,
    mean_pen: f64,
    band_pen: f64,
}

impl MomentLoss for TableLoss {
    type Data = ();

    fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
        let resid = self.coef.dot(theta) - &self.tgt;
        let cell = resid.mapv(|r| r * r).dot(&self.wgt);
        let shrink = self.freq.dot(&theta.mapv(|t| t * t));
        let mean_resid = self.freq.dot(theta) - self.mean_tgt;
        let p = theta.len() as f64;
        let mut band = 0.0;
        for (i, &t) in theta.iter().enumerate() {
            let excess = (t - self.hi[i]).max(0.0) + (self.lo[i] - t).max(0.0);
            let weighted = self.freq[i] * excess;
            band += weighted * weighted;
        }
        Ok(cell
            + self.freq_l2_pen * shrink
            + self.mean_pen * mean_resid * mean_resid
            + self.l2_pen * theta.dot(theta) / p
            + self.band_pen * band)
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
        let resid = self.coef.dot(theta) - &self.tgt;
        let mut grad = self.coef.t().dot(&(&resid * &self.wgt)) * 2.0;
        grad += &(&(&self.freq * theta) * (2.0 * self.freq_l2_pen));
        let mean_resid = self.freq.dot(theta) - self.mean_tgt;
        grad += &(&self.freq * (2.0 * self.mean_pen * mean_resid));
        let p = theta.len() as f64;
        grad += &(theta * (2.0 * self.l2_pen / p));
        for (i, &t) in theta.iter().enumerate() {
            let over = (t - self.hi[i]).max(0.0);
            let under = (self.lo[i] - t).max(0.0);
            grad[i] += 2.0 * self.band_pen * self.freq[i] * self.freq[i] * (over - under);
        }
        Ok(grad)
    }
}

/// Long Adam loop used when L-BFGS fails: periodic evaluation, early stop
/// after a flat stretch, best-seen restoration, abort on non-finite values.
fn adam_fallback(loss: &TableLoss, theta0: Theta, cfg: &DiscreteConfig) -> EstimResult<Theta> {
    let opt_cfg = FirstOrderConfig::with_lr(cfg.fallback_lr)?;
    let mut adam = Adam::new(opt_cfg);
    let mut theta = theta0;
    let mut best = theta.clone();
    let mut best_val = loss.value(&theta, &())?;
    if !best_val.is_finite() {
        return Err(EstimError::NonFiniteFit { what: "tabular fallback starting loss" });
    }
    let mut flat = 0usize;
    for iter in 1..=cfg.fallback_iters {
        let grad = loss.grad(&theta, &())?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(EstimError::NonFiniteFit { what: "tabular fallback gradient" });
        }
        adam.step(&mut theta, &grad)?;
        if iter % cfg.eval_every == 0 {
            let val = loss.value(&theta, &())?;
            if !val.is_finite() {
                return Err(EstimError::NonFiniteFit { what: "tabular fallback loss" });
            }
            log::debug!("tabular fallback iter {iter}: loss {val:e} (best {best_val:e})");
            if val < best_val - cfg.improve_slack {
                best_val = val;
                best = theta.clone();
                flat = 0;
            } else {
                if val < best_val {
                    best_val = val;
                    best = theta.clone();
                }
                flat += 1;
                if flat >= cfg.patience {
                    break;
                }
            }
        }
    }
    Ok(best)
}

fn optimize_table(loss: &TableLoss, theta0: Theta, cfg: &DiscreteConfig) -> EstimResult<Theta> {
    let tols = Tolerances::new(Some(1e-8), None, Some(300))?;
    let opts = SolveOptions::new(tols, LineSearcher::MoreThuente, None)?;
    match minimizer::minimize(loss, theta0.clone(), &(), &opts) {
        Ok(outcome) => Ok(outcome.theta_hat),
        Err(err) => {
            log::debug!("tabular L-BFGS failed ({err}); falling back to Adam");
            adam_fallback(loss, theta0, cfg)
        }
    }
}

impl DiscreteEstimator {
    /// Split the flat action-major table into one [`TabularNet`] per action.
    fn table_to_nuisance(
        &mut self, theta: &Theta, k: usize, num_a: usize, field: ProxyField,
    ) -> EstimResult<NuisanceFn> {
        let mut nets: Vec<Box<dyn CriticNet>> = Vec::with_capacity(num_a);
        for action in 0..num_a {
            let mut net = TabularNet::new(k, &mut self.rng);
            let slice = Array1::from_iter((0..k).map(|l| theta[action * k + l]));
            net.set_params(&slice)?;
            nets.push(Box::new(net));
        }
        Ok(NuisanceFn::per_action(self.emb.clone(), field, nets))
    }
}

impl QEstimator for DiscreteEstimator {
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
        check_discrete("z", &stage.z.view())?;
        check_discrete("w", &stage.w.view())?;
        let eta = normalize_mean_one(eta_prev, "q-fit importance weights")?;

        let z_rows = self.emb.embed_z(&stage.z.view());
        let w_rows = self.emb.embed_w(&stage.w.view());
        let k_z = z_rows.ncols();
        let k_w = w_rows.ncols();
        let num_a = stage.num_a;
        let cz = codes_from_rows(&z_rows);
        let cw = codes_from_rows(&w_rows);

        // Weighted count tables.
        let mut cnt_zwa = Array3::<f64>::zeros((k_z, k_w, num_a));
        let mut cnt_wa = Array2::<f64>::zeros((k_w, num_a));
        let mut cnt_za = Array2::<f64>::zeros((k_z, num_a));
        for i in 0..n {
            cnt_zwa[(cz[i], cw[i], stage.a[i])] += eta[i];
            cnt_wa[(cw[i], stage.a[i])] += eta[i];
            cnt_za[(cz[i], stage.a[i])] += eta[i];
        }
        let total: f64 = cnt_wa.sum();

        // Floored inverse propensities per (w, a); the band ceiling for
        // action a is the largest inverse propensity in column a.
        let mut inv_prop = Array2::<f64>::zeros((k_w, num_a));
        for wl in 0..k_w {
            let p_a = safe_normalize(&cnt_wa.row(wl), self.cfg.eps);
            for action in 0..num_a {
                inv_prop[(wl, action)] = 1.0 / p_a[action];
            }
        }

        // One moment row per observed (w level, action) cell:
        //   Σ_z p(z | w, a) · q(z, a) = 1 / p(a | w).
        let p = k_z * num_a;
        let mut rows = Vec::new();
        let mut tgts = Vec::new();
        let mut wgts = Vec::new();
        for wl in 0..k_w {
            for action in 0..num_a {
                if cnt_wa[(wl, action)] <= 0.0 {
                    continue;
                }
                let col = Array1::from_iter((0..k_z).map(|zl| cnt_zwa[(zl, wl, action)]));
                let p_z = safe_normalize(&col.view(), self.cfg.eps);
                let mut row = Array1::zeros(p);
                for zl in 0..k_z {
                    row[action * k_z + zl] = p_z[zl];
                }
                rows.push(row);
                tgts.push(inv_prop[(wl, action)]);
                wgts.push(cnt_wa[(wl, action)] / total);
            }
        }
        let mut coef = Array2::zeros((rows.len(), p));
        for (r, row) in rows.iter().enumerate() {
            coef.row_mut(r).assign(row);
        }

        // Floored visit frequencies p(a | z)·p(z). They weight the
        // shrinkage, mean, and band penalties; the observed-weighted mean
        // of a true Q-bridge is the number of actions.
        let z_mass = Array1::from_iter((0..k_z).map(|zl| cnt_za.row(zl).sum()));
        let p_z = safe_normalize(&z_mass.view(), self.cfg.eps);
        let mut freq = Array1::zeros(p);
        for zl in 0..k_z {
            let p_a = safe_normalize(&cnt_za.row(zl), self.cfg.eps);
            for action in 0..num_a {
                freq[action * k_z + zl] = p_a[action] * p_z[zl];
            }
        }

        let mut hi = Array1::zeros(p);
        for action in 0..num_a {
            let mut q_max = 0.0f64;
            for wl in 0..k_w {
                if cnt_wa[(wl, action)] > 0.0 {
                    q_max = q_max.max(inv_prop[(wl, action)]);
                }
            }
            if q_max <= 0.0 {
                q_max = num_a as f64;
            }
            for zl in 0..k_z {
                hi[action * k_z + zl] = q_max;
            }
        }

        let loss = TableLoss {
            coef,
            tgt: Array1::from_vec(tgts),
            wgt: Array1::from_vec(wgts),
            freq,
            mean_tgt: num_a as f64,
            lo: Array1::zeros(p),
            hi,
            freq_l2_pen: self.cfg.freq_l2_pen,
            l2_pen: self.cfg.l2_pen,
            mean_pen: self.cfg.mean_pen,
            band_pen: self.cfg.band_pen,
        };
        let theta = optimize_table(&loss, Array1::ones(p), &self.cfg)?;
        self.table_to_nuisance(&theta, k_z, num_a, ProxyField::Z)
    }
}

impl HEstimator for DiscreteEstimator {
    fn fit_h(&mut self, inputs: &HStageInputs<'_>, stage: &StageData) -> EstimResult<NuisanceFn> {
        let n = stage.n();
        if n == 0 {
            return Err(EstimError::EmptyStage);
        }
        if inputs.nu.len() != n || inputs.mu.len() != n {
            return Err(EstimError::StageLengthMismatch {
                what: "h-fit weights",
                expected: n,
                found: inputs.nu.len(),
            });
        }
        check_discrete("z", &stage.z.view())?;
        check_discrete("w", &stage.w.view())?;
        let mean = inputs.nu.mean().unwrap_or(0.0);
        if !mean.is_finite() || mean <= 0.0 {
            return Err(EstimError::NonFiniteFit { what: "h-fit importance weights" });
        }
        let nu = inputs.nu / mean;
        let mu = inputs.mu / mean;

        let z_rows = self.emb.embed_z(&stage.z.view());
        let w_rows = self.emb.embed_w(&stage.w.view());
        let k_z = z_rows.ncols();
        let k_w = w_rows.ncols();
        let num_a = stage.num_a;
        let cz = codes_from_rows(&z_rows);
        let cw = codes_from_rows(&w_rows);

        // One moment row per observed (z level, action) cell:
        //   E[ν·h(W, a) − μ | Z = z, A = a] = 0.
        let p = k_w * num_a;
        let mut cell_coef = Array3::<f64>::zeros((k_z, num_a, k_w));
        let mut cell_tgt = Array2::<f64>::zeros((k_z, num_a));
        let mut cell_cnt = Array2::<f64>::zeros((k_z, num_a));
        let mut cnt_wa = Array2::<f64>::zeros((k_w, num_a));
        for i in 0..n {
            cell_coef[(cz[i], stage.a[i], cw[i])] += nu[i];
            cell_tgt[(cz[i], stage.a[i])] += mu[i];
            cell_cnt[(cz[i], stage.a[i])] += 1.0;
            cnt_wa[(cw[i], stage.a[i])] += nu[i];
        }

        // Floored nu-weighted visit frequencies p(a | w)·p(w) for the
        // shrinkage, mean, and band penalties.
        let w_mass = Array1::from_iter((0..k_w).map(|wl| cnt_wa.row(wl).sum()));
        let p_w = safe_normalize(&w_mass.view(), self.cfg.eps);
        let mut freq = Array1::zeros(p);
        for wl in 0..k_w {
            let p_a = safe_normalize(&cnt_wa.row(wl), self.cfg.eps);
            for action in 0..num_a {
                freq[action * k_w + wl] = p_a[action] * p_w[wl];
            }
        }

        let mut rows = Vec::new();
        let mut tgts = Vec::new();
        let mut wgts = Vec::new();
        for zl in 0..k_z {
            for action in 0..num_a {
                let cnt = cell_cnt[(zl, action)];
                if cnt <= 0.0 {
                    continue;
                }
                let mut row = Array1::zeros(p);
                for wl in 0..k_w {
                    row[action * k_w + wl] = cell_coef[(zl, action, wl)] / cnt;
                }
                rows.push(row);
                tgts.push(cell_tgt[(zl, action)] / cnt);
                wgts.push(cnt / n as f64);
            }
        }
        let mut coef = Array2::zeros((rows.len(), p));
        for (r, row) in rows.iter().enumerate() {
            coef.row_mut(r).assign(row);
        }

        let (lo, hi) = if inputs.h_min <= inputs.h_max {
            (inputs.h_min, inputs.h_max)
        } else {
            (inputs.h_max, inputs.h_min)
        };
        let loss = TableLoss {
            coef,
            tgt: Array1::from_vec(tgts),
            wgt: Array1::from_vec(wgts),
            freq,
            mean_tgt: mu.mean().unwrap_or(0.0),
            lo: Array1::from_elem(p, lo),
            hi: Array1::from_elem(p, hi),
            freq_l2_pen: self.cfg.freq_l2_pen,
            l2_pen: self.cfg.l2_pen,
            mean_pen: self.cfg.mean_pen,
            band_pen: self.cfg.band_pen,
        };
        let theta0 = Array1::from_elem(p, 0.5 * (lo + hi));
        let theta = optimize_table(&loss, theta0, &self.cfg)?;
        self.table_to_nuisance(&theta, k_w, num_a, ProxyField::W)
    }
}
