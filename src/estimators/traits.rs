//! estimators::traits — estimator contracts and fitted nuisance functions.
//!
//! Purpose
//! -------
//! Define the seam between the sequential orchestrator and the per-stage
//! estimation strategies. A Q estimator consumes the running importance
//! weights and a stage snapshot and returns a fitted [`NuisanceFn`]; an H
//! estimator additionally receives the backward-threaded targets. The
//! orchestrator never learns which family (kernel, tabular, RKHS) produced
//! a fit: it only evaluates the returned value objects.
//!
//! Key behaviors
//! -------------
//! - [`QEstimator`] / [`HEstimator`]: strategy traits implemented by the
//!   four estimator variants.
//! - [`NuisanceFn`]: self-contained fitted bridge function. Carries its own
//!   embedding and proxy-field choice so evaluation needs only raw columns.
//! - [`HStageInputs`]: the backward-pass bundle (weights, targets, and the
//!   discounted reward band used by the tabular estimator's penalty).
//! - [`TupleSet`]: deduplicated covariate tuples with dense codes, shared
//!   by the kernel estimators for observed rows and action cross sets.
//!
//! Conventions
//! -----------
//! - Importance weights are renormalized to mean one inside each fit
//!   ([`normalize_mean_one`]), so scale drift across stages cannot bias a
//!   stage loss.
//! - Cross-action tuple indices follow `a + num_a · code(v)`, matching the
//!   layout the estimators use to slice Gram matrices.
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};

use crate::critics::CriticNet;
use crate::data::dataset::StageData;
use crate::data::embedding::{EmbeddingSet, embed_wxa, embed_zxa};
use crate::dedup::unique_rows;
use crate::estimators::errors::{EstimError, EstimResult};
use crate::kernels::PsdKernel;

/// Which proxy column a fitted function reads: Q-bridges read `z`,
/// H-bridges read `w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyField {
    Z,
    W,
}

/// Per-stage Q estimation strategy.
pub trait QEstimator {
    /// Fit the Q-bridge for one stage.
    ///
    /// `eta_prev` holds the cumulative importance weights entering the
    /// stage (all ones at `t = 0`); the estimator renormalizes them to
    /// mean one internally.
    fn fit_q(&mut self, eta_prev: &Array1<f64>, stage: &StageData) -> EstimResult<NuisanceFn>;
}

/// Backward-pass inputs for one H fit.
///
/// - `nu`: moment weights on the fitted function (the entering eta).
/// - `mu`: moment targets, `eta_prev · y · 1{a = e}`.
/// - `y`: per-trajectory discounted targets for this stage.
/// - `h_min` / `h_max`: discounted future reward band, the plausible range
///   of H outputs used by band penalties.
pub struct HStageInputs<'a> {
    pub eta_prev: &'a Array1<f64>,
    pub nu: &'a Array1<f64>,
    pub mu: &'a Array1<f64>,
    pub y: &'a Array1<f64>,
    pub h_min: f64,
    pub h_max: f64,
}

/// Per-stage H estimation strategy.
pub trait HEstimator {
    /// Fit the H-bridge for one stage.
    fn fit_h(&mut self, inputs: &HStageInputs<'_>, stage: &StageData) -> EstimResult<NuisanceFn>;
}

#[derive(Clone)]
enum NuisanceFnKind {
    /// A single critic over the embedded `(proxy, x, a)` rows, divided by
    /// an optional normalization constant.
    Net { net: Box<dyn CriticNet>, norm: f64 },
    /// One critic per action over the embedded proxy rows only.
    PerAction { nets: Vec<Box<dyn CriticNet>> },
    /// RKHS expansion: `k(·, support) · β`.
    Rkhs { kernel: Box<dyn PsdKernel>, support: Array2<f64>, beta: Array1<f64> },
    /// Constant function.
    Const(f64),
}

/// Fitted bridge function, self-contained for evaluation.
///
/// Evaluation takes the raw proxy column (`z` for Q fits, `w` for H fits),
/// the optional context column, and the action codes, embeds them with the
/// stored [`EmbeddingSet`], and produces one value per row.
#[derive(Clone)]
pub struct NuisanceFn {
    emb: Arc<dyn EmbeddingSet>,
    field: ProxyField,
    kind: NuisanceFnKind,
}

impl NuisanceFn {
    pub fn from_net(
        emb: Arc<dyn EmbeddingSet>, field: ProxyField, net: Box<dyn CriticNet>, norm: f64,
    ) -> Self {
        Self { emb, field, kind: NuisanceFnKind::Net { net, norm } }
    }

    pub fn per_action(
        emb: Arc<dyn EmbeddingSet>, field: ProxyField, nets: Vec<Box<dyn CriticNet>>,
    ) -> Self {
        Self { emb, field, kind: NuisanceFnKind::PerAction { nets } }
    }

    pub fn rkhs(
        emb: Arc<dyn EmbeddingSet>, field: ProxyField, kernel: Box<dyn PsdKernel>,
        support: Array2<f64>, beta: Array1<f64>,
    ) -> Self {
        Self { emb, field, kind: NuisanceFnKind::Rkhs { kernel, support, beta } }
    }

    pub fn constant(emb: Arc<dyn EmbeddingSet>, field: ProxyField, value: f64) -> Self {
        Self { emb, field, kind: NuisanceFnKind::Const(value) }
    }

    /// The single underlying critic, when this fit is a plain net.
    ///
    /// Used by the joint game trainer to warm-start its players from a
    /// pretraining fit.
    pub fn critic(&self) -> Option<&dyn CriticNet> {
        match &self.kind {
            NuisanceFnKind::Net { net, .. } => Some(net.as_ref()),
            _ => None,
        }
    }

    fn embed(
        &self, v: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>, a: &ArrayView1<usize>,
    ) -> Array2<f64> {
        match self.field {
            ProxyField::Z => embed_zxa(self.emb.as_ref(), v, x, a),
            ProxyField::W => embed_wxa(self.emb.as_ref(), v, x, a),
        }
    }

    /// Evaluate on raw columns: one output per row.
    ///
    /// # Errors
    /// - [`EstimError::StageLengthMismatch`] when columns disagree in length
    ///   or an action code exceeds a per-action table.
    pub fn eval(
        &self, v: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>, a: &ArrayView1<usize>,
    ) -> EstimResult<Array1<f64>> {
        if a.len() != v.len() {
            return Err(EstimError::StageLengthMismatch {
                what: "action column",
                expected: v.len(),
                found: a.len(),
            });
        }
        match &self.kind {
            NuisanceFnKind::Net { net, norm } => {
                let inputs = self.embed(v, x, a);
                Ok(net.forward(&inputs.view()) / *norm)
            }
            NuisanceFnKind::PerAction { nets } => {
                let inputs = match self.field {
                    ProxyField::Z => self.emb.embed_z(v),
                    ProxyField::W => self.emb.embed_w(v),
                };
                let per: Vec<Array1<f64>> =
                    nets.iter().map(|n| n.forward(&inputs.view())).collect();
                let mut out = Array1::zeros(v.len());
                for (i, &action) in a.iter().enumerate() {
                    let vals = per.get(action).ok_or(EstimError::StageLengthMismatch {
                        what: "per-action table",
                        expected: nets.len(),
                        found: action,
                    })?;
                    out[i] = vals[i];
                }
                Ok(out)
            }
            NuisanceFnKind::Rkhs { kernel, support, beta } => {
                let inputs = self.embed(v, x, a);
                let gram = kernel.gram(&inputs.view(), &support.view())?;
                Ok(gram.dot(beta))
            }
            NuisanceFnKind::Const(c) => Ok(Array1::from_elem(v.len(), *c)),
        }
    }

    /// Evaluate with every row forced to the same action code.
    pub fn eval_const_action(
        &self, v: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>, action: usize,
    ) -> EstimResult<Array1<f64>> {
        let a = Array1::from_elem(v.len(), action);
        self.eval(v, x, &a.view())
    }
}

/// Rescale non-negative weights to mean one.
///
/// # Errors
/// [`EstimError::NonFiniteFit`] when the mass is zero or non-finite, which
/// happens when no trajectory agrees with the evaluation policy so far.
pub fn normalize_mean_one(weights: &Array1<f64>, what: &'static str) -> EstimResult<Array1<f64>> {
    let mean = weights.mean().unwrap_or(0.0);
    if !mean.is_finite() || mean <= 0.0 {
        return Err(EstimError::NonFiniteFit { what });
    }
    Ok(weights / mean)
}

/// Deduplicated covariate tuples with dense per-observation codes.
///
/// Holds the distinct `(v[, x], a)` tuples of a stage in first-occurrence
/// order, column-major, ready for embedding into critic or kernel inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleSet {
    pub v: Array1<f64>,
    pub x: Option<Array1<f64>>,
    pub a: Array1<usize>,
}

impl TupleSet {
    /// Dedup observed `(v[, x], a)` rows.
    ///
    /// Returns per-observation codes into the set.
    pub fn from_observed(
        v: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>, a: &ArrayView1<usize>,
    ) -> EstimResult<(Vec<usize>, Self)> {
        let a_f64 = Array1::from_iter(a.iter().map(|&c| c as f64));
        let mut fields = vec![v.view()];
        if let Some(x) = x {
            fields.push(x.view());
        }
        fields.push(a_f64.view());
        let (codes, uniques) = unique_rows(&fields)?;
        let mut iter = uniques.into_iter();
        let v_u = iter.next().ok_or(EstimError::EmptyStage)?;
        let x_u = if x.is_some() { iter.next() } else { None };
        let a_u = iter
            .next()
            .ok_or(EstimError::EmptyStage)?
            .mapv(|c| c.round().max(0.0) as usize);
        Ok((codes, Self { v: v_u, x: x_u, a: a_u }))
    }

    /// Cross the distinct `(v[, x])` tuples with every action `0..num_a`.
    ///
    /// Returns per-observation codes into the *value* uniques; the tuple at
    /// `(value code c, action a)` sits at index `a + num_a · c`.
    pub fn cross_actions(
        v: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>, num_a: usize,
    ) -> EstimResult<(Vec<usize>, Self)> {
        let mut fields = vec![v.view()];
        if let Some(x) = x {
            fields.push(x.view());
        }
        let (codes, uniques) = unique_rows(&fields)?;
        let v_u = &uniques[0];
        let x_u = if x.is_some() { Some(&uniques[1]) } else { None };
        let k = v_u.len();
        let total = k * num_a;
        let mut v_rep = Array1::zeros(total);
        let mut x_rep = x_u.map(|_| Array1::zeros(total));
        let mut a_rep = Array1::zeros(total);
        for code in 0..k {
            for action in 0..num_a {
                let idx = action + num_a * code;
                v_rep[idx] = v_u[code];
                if let (Some(x_rep), Some(x_u)) = (&mut x_rep, x_u) {
                    x_rep[idx] = x_u[code];
                }
                a_rep[idx] = action;
            }
        }
        Ok((codes, Self { v: v_rep, x: x_rep, a: a_rep }))
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    /// Embed the tuples as critic/kernel inputs for the given proxy field.
    pub fn embed(&self, emb: &dyn EmbeddingSet, field: ProxyField) -> Array2<f64> {
        let x = self.x.as_ref().map(|x| x.view());
        match field {
            ProxyField::Z => embed_zxa(emb, &self.v.view(), x.as_ref(), &self.a.view()),
            ProxyField::W => embed_wxa(emb, &self.v.view(), x.as_ref(), &self.a.view()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::embedding::OneHotEmbedding;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Weight renormalization to mean one, including the degenerate case.
    // - Observed-tuple dedup and the cross-action layout.
    // - Constant and per-action NuisanceFn evaluation.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify mean-one renormalization and rejection of zero-mass weights.
    //
    // Given
    // -----
    // - Weights (2, 0, 4) and all-zero weights.
    //
    // Expect
    // ------
    // - Mean of the output is 1; zero mass errors.
    fn normalize_mean_one_rescales_and_rejects_zero_mass() {
        // Arrange
        let w = array![2.0, 0.0, 4.0];

        // Act
        let out = normalize_mean_one(&w, "test").expect("should normalize");

        // Assert
        assert!((out.mean().unwrap_or(0.0) - 1.0).abs() < 1e-12);
        assert!(matches!(
            normalize_mean_one(&array![0.0, 0.0], "test"),
            Err(EstimError::NonFiniteFit { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Verify the cross-action layout `a + num_a · code`.
    //
    // Given
    // -----
    // - Values [5, 7, 5] (two distinct), num_a = 2, no context.
    //
    // Expect
    // ------
    // - A set of 4 tuples ordered (5,0), (5,1), (7,0), (7,1) and value
    //   codes [0, 1, 0].
    fn cross_actions_uses_interleaved_layout() {
        // Arrange
        let v = array![5.0, 7.0, 5.0];

        // Act
        let (codes, set) =
            TupleSet::cross_actions(&v.view(), None, 2).expect("cross should succeed");

        // Assert
        assert_eq!(codes, vec![0, 1, 0]);
        assert_eq!(set.v, array![5.0, 5.0, 7.0, 7.0]);
        assert_eq!(set.a, array![0usize, 1, 0, 1]);
    }

    #[test]
    // Purpose
    // -------
    // Verify observed-tuple dedup round-trips rows through codes.
    //
    // Given
    // -----
    // - Rows (1,0), (2,1), (1,0).
    //
    // Expect
    // ------
    // - Two distinct tuples; codes [0, 1, 0]; fields reconstruct.
    fn from_observed_codes_reconstruct_tuples() {
        // Arrange
        let v = array![1.0, 2.0, 1.0];
        let a = array![0usize, 1, 0];

        // Act
        let (codes, set) =
            TupleSet::from_observed(&v.view(), None, &a.view()).expect("dedup should succeed");

        // Assert
        assert_eq!(set.len(), 2);
        for i in 0..3 {
            assert_eq!(set.v[codes[i]], v[i]);
            assert_eq!(set.a[codes[i]], a[i]);
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify constant nuisance functions ignore inputs and per-action
    // tables dispatch on the action code.
    //
    // Given
    // -----
    // - A constant fn with value 2.5, and a per-action pair of tabular
    //   critics over a 2-level one-hot proxy.
    //
    // Expect
    // ------
    // - Constant output everywhere; per-action output picks the right
    //   table entry per row.
    fn nuisance_fn_const_and_per_action_eval() {
        use crate::critics::{CriticNet, TabularNet};
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        // Arrange
        let emb = Arc::new(OneHotEmbedding::new(2, 2, 2));
        let konst = NuisanceFn::constant(emb.clone(), ProxyField::Z, 2.5);
        let mut rng = StdRng::seed_from_u64(3);
        let mut net0 = TabularNet::new(2, &mut rng);
        let mut net1 = TabularNet::new(2, &mut rng);
        net0.set_params(&array![10.0, 20.0]).expect("set");
        net1.set_params(&array![30.0, 40.0]).expect("set");
        let per = NuisanceFn::per_action(
            emb,
            ProxyField::Z,
            vec![Box::new(net0) as Box<dyn CriticNet>, Box::new(net1)],
        );
        let z = array![0.0, 1.0];
        let a = array![1usize, 0];

        // Act
        let c = konst.eval(&z.view(), None, &a.view()).expect("const eval");
        let p = per.eval(&z.view(), None, &a.view()).expect("per-action eval");

        // Assert
        assert_eq!(c, array![2.5, 2.5]);
        // Row 0: action 1 over level 0 -> net1 weight 30; row 1: action 0
        // over level 1 -> net0 weight 20.
        assert_eq!(p, array![30.0, 20.0]);
    }
}
