//! Integration tests for the sequential nuisance-estimation pipeline.
//!
//! Purpose
//! -------
//! - Validate the end-to-end path: from a validated trajectory batch,
//!   through per-stage Q and H fits, to the threaded cumulative weights
//!   and discounted targets the downstream value estimators consume.
//! - Exercise realistic data regimes (uniform binary loggers with known
//!   inverse propensities) rather than toy edge cases only.
//!
//! Coverage
//! --------
//! - `data`:
//!   - `TrajectoryBatch` construction over multiple stages.
//!   - `OneHotEmbedding` as the discrete feature map.
//! - `sequential::SequentialNuisanceEstimation`:
//!   - The discrete and MMR estimator pairs end to end.
//!   - Weight threading consistency between `eta_prev` and `eta_final`.
//! - `game::JointNuisanceTrainer`:
//!   - A short adversarial run with MMR pretraining enabled.
//!
//! Exclusions
//! ----------
//! - Fine-grained behavior of the individual estimators (ridge
//!   escalation, fallback loops, band penalties) — covered by unit tests.
//! - Statistical efficiency comparisons across estimator families — those
//!   belong in targeted experiments, not correctness tests.
use std::sync::Arc;

use ndarray::Array1;
use pci_nuisance::data::{EmbeddingSet, OneHotEmbedding, PciDataset, TrajectoryBatch};
use pci_nuisance::estimators::discrete::DiscreteConfig;
use pci_nuisance::estimators::mmr::MmrConfig;
use pci_nuisance::game::{GameConfig, JointNuisanceTrainer};
use pci_nuisance::sequential::SequentialNuisanceEstimation;

/// Purpose
/// -------
/// Generate a uniform binary logging batch: proxies, actions, and the
/// evaluation policy are all Bernoulli(1/2) draws from a fixed LCG, with
/// rewards in `[0, 0.75]`. Under this logger the true Q-bridge is the
/// constant inverse propensity `1 / p(a | w) = 2`.
///
/// Parameters
/// ----------
/// - `n`: Trajectories per stage; should be large enough for the moment
///   equations to pin down the tables (a few hundred).
/// - `horizon`: Number of stages.
///
/// Returns
/// -------
/// - The validated batch plus the per-stage `(z, a)` columns needed to
///   evaluate the fitted Q-bridges at the observed tuples.
fn uniform_binary_batch(
    n: usize, horizon: usize,
) -> (TrajectoryBatch, Vec<(Array1<f64>, Array1<usize>)>) {
    let mut z = Vec::new();
    let mut w = Vec::new();
    let mut a = Vec::new();
    let mut e = Vec::new();
    let mut r = Vec::new();
    let mut za_cols = Vec::new();
    let mut state: u64 = 0x9E3779B97F4A7C15;
    for _ in 0..horizon {
        let mut zt = Array1::zeros(n);
        let mut wt = Array1::zeros(n);
        let mut at = Array1::zeros(n);
        let mut et = Array1::zeros(n);
        let mut rt = Array1::zeros(n);
        for i in 0..n {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            zt[i] = ((state >> 17) & 1) as f64;
            wt[i] = ((state >> 29) & 1) as f64;
            at[i] = ((state >> 41) & 1) as usize;
            et[i] = ((state >> 47) & 1) as usize;
            rt[i] = ((state >> 53) & 3) as f64 * 0.25;
        }
        z.push(zt.clone());
        w.push(wt);
        za_cols.push((zt, at.clone()));
        a.push(at);
        e.push(et);
        r.push(rt);
    }
    let batch =
        TrajectoryBatch::new(z, w, None, a, e, r).expect("uniform batch should validate");
    (batch, za_cols)
}

#[test]
// Purpose
// -------
// Run the tabular pipeline over two stages of uniform binary data and
// check that the stage-0 Q-bridge recovers the inverse propensity of the
// logger.
//
// Given
// -----
// - 400 trajectories, 2 stages, uniform Bernoulli(1/2) actions, so the
//   true Q value is 2 at every observed tuple.
//
// Expect
// ------
// - Weights entering stage 0 are all ones.
// - Every fitted stage-0 Q value lies within 0.5 of 2.0.
fn discrete_pipeline_recovers_uniform_logger_weights() {
    // Arrange
    let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
    let (batch, za_cols) = uniform_binary_batch(400, 2);
    let mut pipeline =
        SequentialNuisanceEstimation::with_discrete(emb, 2, 1.0, 2, DiscreteConfig::default())
            .expect("config should validate");

    // Act
    let fits = pipeline.fit(&batch).expect("fit should succeed");

    // Assert
    assert_eq!(fits.eta_prev[0], Array1::from_elem(400, 1.0));
    let (z0, a0) = &za_cols[0];
    let q0 = fits.q[0].eval(&z0.view(), None, &a0.view()).expect("eval should succeed");
    for &v in q0.iter() {
        assert!((v - 2.0).abs() < 0.5, "fitted q value {v} too far from 2.0");
    }
}

#[test]
// Purpose
// -------
// On a perfectly balanced single-stage design the empirical propensity
// is exactly 1/2 and the uniform floor leaves it untouched, so the
// tabular Q table should land on the analytic inverse propensity almost
// exactly.
//
// Given
// -----
// - 512 trajectories enumerating every (z, w, a, e) combination equally,
//   horizon 1.
//
// Expect
// ------
// - Every fitted Q value within 0.05 of 2.0.
fn discrete_q_matches_analytic_inverse_propensity_on_balanced_data() {
    // Arrange
    let n = 512;
    let mut z = Array1::zeros(n);
    let mut w = Array1::zeros(n);
    let mut a = Array1::zeros(n);
    let mut e = Array1::zeros(n);
    for i in 0..n {
        z[i] = ((i >> 3) & 1) as f64;
        w[i] = ((i >> 2) & 1) as f64;
        a[i] = (i >> 1) & 1;
        e[i] = i & 1;
    }
    let batch = TrajectoryBatch::new(
        vec![z.clone()],
        vec![w],
        None,
        vec![a.clone()],
        vec![e],
        vec![Array1::from_elem(n, 1.0)],
    )
    .expect("balanced batch should validate");
    let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
    let mut pipeline =
        SequentialNuisanceEstimation::with_discrete(emb, 1, 1.0, 2, DiscreteConfig::default())
            .expect("config should validate");

    // Act
    let fits = pipeline.fit(&batch).expect("fit should succeed");

    // Assert
    let q0 = fits.q[0].eval(&z.view(), None, &a.view()).expect("eval should succeed");
    for &v in q0.iter() {
        assert!((v - 2.0).abs() < 0.05, "fitted q value {v} misses the analytic 2.0");
    }
}

#[test]
// Purpose
// -------
// Check weight threading consistency: the final weights must equal the
// weights entering the last stage compounded with that stage's fitted Q
// values and evaluation matches.
//
// Given
// -----
// - The two-stage tabular fit from the uniform binary batch.
//
// Expect
// ------
// - `eta_final == eta_prev[1] · q_1(z_1, a_1) · 1{a_1 = e_1}` elementwise.
fn weight_threading_is_consistent_across_stages() {
    // Arrange
    let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
    let (batch, za_cols) = uniform_binary_batch(300, 2);
    let mut pipeline =
        SequentialNuisanceEstimation::with_discrete(emb, 2, 0.9, 2, DiscreteConfig::default())
            .expect("config should validate");

    // Act
    let fits = pipeline.fit(&batch).expect("fit should succeed");

    // Assert
    let (z1, a1) = &za_cols[1];
    let q1 = fits.q[1].eval(&z1.view(), None, &a1.view()).expect("eval should succeed");
    for i in 0..300 {
        let matched = if batch.a(1)[i] == batch.e(1)[i] { 1.0 } else { 0.0 };
        let expected = fits.eta_prev[1][i] * q1[i] * matched;
        assert!(
            (fits.eta_final[i] - expected).abs() < 1e-12,
            "weight threading mismatch at {i}"
        );
    }
}

#[test]
// Purpose
// -------
// Check that the backward tabular fits respect the threaded target band:
// with rewards in [0, 0.75] and γ = 0.5, plausible H values at stage 0
// lie in [0, 0.75 + 0.5·0.75] = [0, 1.125].
//
// Given
// -----
// - The two-stage tabular fit from the uniform binary batch.
//
// Expect
// ------
// - Every fitted stage-0 H value is finite and within the band, up to
//   the soft-penalty slack of 0.5.
fn discrete_h_fits_stay_near_the_target_band() {
    // Arrange
    let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
    let (batch, _) = uniform_binary_batch(300, 2);
    let mut pipeline =
        SequentialNuisanceEstimation::with_discrete(emb, 2, 0.5, 2, DiscreteConfig::default())
            .expect("config should validate");

    // Act
    let fits = pipeline.fit(&batch).expect("fit should succeed");

    // Assert
    let w0 = batch.w(0).to_owned();
    let a0 = batch.a(0).to_owned();
    let h0 = fits.h[0].eval(&w0.view(), None, &a0.view()).expect("eval should succeed");
    for &v in h0.iter() {
        assert!(v.is_finite());
        assert!((-0.5..=1.625).contains(&v), "h value {v} escapes the target band");
    }
}

#[test]
// Purpose
// -------
// Run the MMR pipeline end to end on a single stage and check the fitted
// Q-bridge averages near the inverse propensity.
//
// Given
// -----
// - 200 trajectories, 1 stage, uniform binary logger (true q = 2).
//
// Expect
// ------
// - The mean fitted Q value at observed tuples lies within 0.5 of 2.0.
fn mmr_pipeline_averages_near_inverse_propensity() {
    // Arrange
    let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
    let (batch, za_cols) = uniform_binary_batch(200, 1);
    let mut pipeline =
        SequentialNuisanceEstimation::with_mmr(emb, 1, 1.0, 2, MmrConfig::default())
            .expect("config should validate");

    // Act
    let fits = pipeline.fit(&batch).expect("fit should succeed");

    // Assert
    let (z0, a0) = &za_cols[0];
    let q0 = fits.q[0].eval(&z0.view(), None, &a0.view()).expect("eval should succeed");
    let mean = q0.mean().expect("non-empty");
    assert!((mean - 2.0).abs() < 0.5, "mean fitted q {mean} too far from 2.0");
}

#[test]
// Purpose
// -------
// Run the joint adversarial trainer with MMR pretraining on a short
// curriculum and check it produces finite, well-shaped fits.
//
// Given
// -----
// - 64 trajectories over 2 stages, 2 epochs per curriculum part plus 2
//   final epochs.
//
// Expect
// ------
// - One Q and one H fit per stage, all critic parameters finite, and
//   all-ones weights entering stage 0.
fn joint_game_trainer_runs_end_to_end() {
    // Arrange
    let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
    let (batch, _) = uniform_binary_batch(64, 2);
    let cfg = GameConfig {
        batch_size: 32,
        num_epochs_per_stage: 2,
        num_epochs_final: 2,
        eval_every: 100,
        ..Default::default()
    };
    let mut trainer =
        JointNuisanceTrainer::new(cfg, emb, 2, 0.9, 2).expect("config should validate");

    // Act
    let fits = trainer.fit(&batch).expect("training should run");

    // Assert
    assert_eq!(fits.q.len(), 2);
    assert_eq!(fits.h.len(), 2);
    assert_eq!(fits.eta_prev[0], Array1::from_elem(64, 1.0));
    for fit in fits.q.iter().chain(fits.h.iter()) {
        let critic = fit.critic().expect("net-backed fit");
        assert!(critic.params().iter().all(|v| v.is_finite()));
    }
}
