//! game — joint adversarial training of all bridge functions at once.
//!
//! Purpose
//! -------
//! Instead of fitting each stage in isolation, the joint trainer plays one
//! big smooth game: every stage contributes a Q moment and an H moment,
//! each paired with its own adversarial test function, and all players are
//! updated simultaneously with optimistic Adam. Because the threaded
//! quantities (cumulative weights, discounted targets) are graph nodes
//! rather than frozen vectors, errors made at one stage propagate
//! gradients into the players of every other stage.
//!
//! Key behaviors
//! -------------
//! - Four players per stage: the Q and H critics descend the objective,
//!   their adversaries ascend it. Gradients for all players come from a
//!   single backward sweep at shared parameters, then every optimizer
//!   steps.
//! - The adversary residuals of all active parts are summed into one
//!   shared stabilizer `−0.25·mean(reg²)` with the fitted side detached,
//!   so the term shapes only the test functions.
//! - Weight calibration and target anchoring are paired soft penalties
//!   (`eta_lmbda`, `y_lmbda`), each with an elementwise and a mean form;
//!   the anchor target stays in the graph so its gradient reaches
//!   later-stage players. The full-data evaluation pass skips them.
//! - Curriculum: moments enter the objective one stage at a time (Q parts
//!   forward, then H parts backward) every `num_epochs_per_stage` epochs,
//!   followed by `num_epochs_final` epochs over the full objective.
//! - Optional pretraining fits every stage with the normalized discrete
//!   MMR estimator and warm-starts the critics from those fits when the
//!   parameter layouts match.
//!
//! Invariants & assumptions
//! ------------------------
//! - Stage `t` players use learning rate `lr · γ^t`.
//! - A non-finite player parameter after any step aborts training.
pub mod batch;
pub mod tape;

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::critics::{CriticNet, NetKind};
use crate::data::dataset::{PciDataset, StageData};
use crate::data::embedding::{EmbeddingSet, embed_wxa, embed_zxa};
use crate::estimators::errors::{EstimError, EstimResult};
use crate::estimators::discrete_mmr::DiscreteMmrConfig;
use crate::estimators::traits::{NuisanceFn, ProxyField};
use crate::game::batch::BatchIter;
use crate::game::tape::{NodeId, Tape};
use crate::optimization::first_order::{FirstOrderConfig, OAdam};
use crate::sequential::{FittedNuisances, SequentialNuisanceEstimation};

/// Configuration of the joint game trainer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameConfig {
    /// Critic and adversary architecture for every player.
    pub net: NetKind,
    /// Base learning rate; stage `t` players use `lr · γ^t`.
    pub lr: f64,
    pub batch_size: usize,
    /// Epochs between curriculum part activations.
    pub num_epochs_per_stage: usize,
    /// Extra epochs on the full objective after the curriculum completes.
    pub num_epochs_final: usize,
    /// Weights of the calibration penalties on the threaded weights:
    /// elementwise `mean((η − 1)²)` and mean `(mean(η) − 1)²`.
    pub eta_lmbda: (f64, f64),
    /// Weights of the target-matching penalties tying each H critic to
    /// the mean discounted target, elementwise and in mean.
    pub y_lmbda: (f64, f64),
    /// Warm-start the critics from per-stage normalized MMR fits.
    pub pretrain: bool,
    /// Pretraining configuration; its `net` should match `net` above or
    /// the warm start is skipped.
    pub pretrain_cfg: DiscreteMmrConfig,
    /// Epoch cadence of full-data objective logging.
    pub eval_every: usize,
    pub seed: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            net: NetKind::Linear,
            lr: 5e-3,
            batch_size: 64,
            num_epochs_per_stage: 20,
            num_epochs_final: 50,
            eta_lmbda: (1.0, 1.0),
            y_lmbda: (0.1, 0.1),
            pretrain: true,
            pretrain_cfg: DiscreteMmrConfig::default(),
            eval_every: 10,
            seed: 0,
        }
    }
}

struct Player {
    net: Box<dyn CriticNet>,
    opt: OAdam,
    ascend: bool,
}

/// Per-stage input tensors, embedded once per fit.
struct StageTensors {
    zxa: Array2<f64>,
    wxa_obs: Array2<f64>,
    wxa_act: Vec<Array2<f64>>,
    matches: Array1<f64>,
    r: Array1<f64>,
}

impl StageTensors {
    fn from_stage(emb: &dyn EmbeddingSet, stage: &StageData) -> Self {
        let x = stage.x.as_ref().map(|x| x.view());
        let zxa = embed_zxa(emb, &stage.z.view(), x.as_ref(), &stage.a.view());
        let wxa_obs = embed_wxa(emb, &stage.w.view(), x.as_ref(), &stage.a.view());
        let wxa_act = (0..stage.num_a)
            .map(|action| {
                let forced = Array1::from_elem(stage.n(), action);
                embed_wxa(emb, &stage.w.view(), x.as_ref(), &forced.view())
            })
            .collect();
        Self { zxa, wxa_obs, wxa_act, matches: stage.eval_match(), r: stage.r.clone() }
    }

    fn take(&self, idx: &[usize]) -> Self {
        Self {
            zxa: take_rows(&self.zxa, idx),
            wxa_obs: take_rows(&self.wxa_obs, idx),
            wxa_act: self.wxa_act.iter().map(|m| take_rows(m, idx)).collect(),
            matches: take_vec(&self.matches, idx),
            r: take_vec(&self.r, idx),
        }
    }
}

fn take_rows(m: &Array2<f64>, idx: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((idx.len(), m.ncols()), |(i, j)| m[(idx[i], j)])
}

fn take_vec(v: &Array1<f64>, idx: &[usize]) -> Array1<f64> {
    Array1::from_iter(idx.iter().map(|&i| v[i]))
}

/// Joint trainer over a fixed horizon, discount factor, and action space.
pub struct JointNuisanceTrainer {
    cfg: GameConfig,
    emb: Arc<dyn EmbeddingSet>,
    horizon: usize,
    gamma: f64,
    num_a: usize,
    rng: StdRng,
}

impl JointNuisanceTrainer {
    /// # Errors
    /// [`EstimError::InvalidConfig`] for a zero horizon, empty action
    /// space, or a discount factor outside `(0, 1]`.
    pub fn new(
        cfg: GameConfig, emb: Arc<dyn EmbeddingSet>, horizon: usize, gamma: f64, num_a: usize,
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
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(Self { cfg, emb, horizon, gamma, num_a, rng })
    }

    fn player_ids(t: usize) -> (usize, usize, usize, usize) {
        (4 * t, 4 * t + 1, 4 * t + 2, 4 * t + 3)
    }

    fn build_players(&mut self, tensors: &[StageTensors]) -> EstimResult<Vec<Player>> {
        let mut players = Vec::with_capacity(4 * self.horizon);
        for (t, st) in tensors.iter().enumerate() {
            let lr = self.cfg.lr * self.gamma.powi(t as i32);
            let d_q = st.zxa.ncols();
            let d_g = st.wxa_obs.ncols();
            for (dim, ascend) in [(d_q, false), (d_g, true), (d_g, false), (d_q, true)] {
                players.push(Player {
                    net: self.cfg.net.build(dim, &mut self.rng),
                    opt: OAdam::new(FirstOrderConfig::with_lr(lr)?),
                    ascend,
                });
            }
        }
        Ok(players)
    }

    /// Warm-start the critics from per-stage normalized MMR fits.
    ///
    /// The raw critics are extracted through [`NuisanceFn::critic`], so the
    /// pretraining normalizers do not rescale the warm starts.
    fn pretrain(&self, ds: &dyn PciDataset, players: &mut [Player]) -> EstimResult<()> {
        let mut orch = SequentialNuisanceEstimation::with_discrete_mmr(
            self.emb.clone(),
            self.horizon,
            self.gamma,
            self.num_a,
            self.cfg.pretrain_cfg,
        )?;
        let fitted = orch.fit(ds)?;
        for t in 0..self.horizon {
            let (qid, _, hid, _) = Self::player_ids(t);
            for (fit, pid) in [(&fitted.q[t], qid), (&fitted.h[t], hid)] {
                match fit.critic() {
                    Some(c) if c.num_params() == players[pid].net.num_params() => {
                        players[pid].net = c.clone_box();
                    }
                    _ => log::warn!("stage {t}: pretraining fit incompatible, skipping warm start"),
                }
            }
        }
        Ok(())
    }

    /// Assemble the game objective over one batch.
    ///
    /// Parts enter in curriculum order: Q moments forward in time, then H
    /// moments backward. H parts require all Q parts, which the curriculum
    /// schedule guarantees. The evaluation pass skips the soft penalties
    /// so logged objectives reflect the raw moment violations.
    fn build_objective<'a>(
        &self, tape: &mut Tape<'a>, bt: &'a [StageTensors], players: &'a [Player],
        num_parts: usize, with_penalties: bool,
    ) -> EstimResult<NodeId> {
        let h = self.horizon;
        let q_parts = num_parts.min(h);
        let h_parts = num_parts.saturating_sub(h);
        let b = bt[0].matches.len();

        let mut obj = tape.constant(Array1::zeros(1));
        let mut reg: Option<NodeId> = None;
        let mut eta = tape.constant(Array1::from_elem(b, 1.0));
        let mut eta_nodes = Vec::with_capacity(h);
        let mut q_nodes = Vec::with_capacity(h);

        for t in 0..q_parts {
            let st = &bt[t];
            let (qid, gid, _, _) = Self::player_ids(t);
            let q_net = players[qid].net.as_ref();
            let g_net = players[gid].net.as_ref();

            let q_vals = tape.net_forward(qid, q_net, &st.zxa)?;
            let g_obs = tape.net_forward(gid, g_net, &st.wxa_obs)?;
            let mut g_sum = tape.net_forward(gid, g_net, &st.wxa_act[0])?;
            for action in 1..self.num_a {
                let ga = tape.net_forward(gid, g_net, &st.wxa_act[action])?;
                g_sum = tape.add(g_sum, ga)?;
            }

            let qg = tape.mul(q_vals, g_obs)?;
            let m_raw = tape.sub(qg, g_sum)?;
            let m = tape.mul(eta, m_raw)?;
            let m_mean = tape.mean(m);
            obj = tape.add(obj, m_mean)?;

            // Adversary residual; the fitted side is detached so the
            // shared regularizer shapes only g.
            let q_det = tape.detach(q_vals);
            let eta_det = tape.detach(eta);
            let qg_det = tape.mul(q_det, g_obs)?;
            let raw_det = tape.sub(qg_det, g_sum)?;
            let part_reg = tape.mul(eta_det, raw_det)?;
            reg = Some(match reg {
                Some(acc) => tape.add(acc, part_reg)?,
                None => part_reg,
            });

            if with_penalties {
                // Calibrate the weights entering this stage, elementwise
                // and in mean.
                let dev = tape.add_scalar(eta, -1.0);
                let dev_sq = tape.square(dev);
                let dev_mean = tape.mean(dev_sq);
                let pen0 = tape.scale(dev_mean, self.cfg.eta_lmbda.0);
                obj = tape.add(obj, pen0)?;
                let eta_mean = tape.mean(eta);
                let centered = tape.add_scalar(eta_mean, -1.0);
                let cal = tape.square(centered);
                let pen1 = tape.scale(cal, self.cfg.eta_lmbda.1);
                obj = tape.add(obj, pen1)?;
            }

            // Thread the weights.
            eta_nodes.push(eta);
            q_nodes.push(q_vals);
            let q_match = tape.mul_const(q_vals, st.matches.clone())?;
            eta = tape.mul(eta, q_match)?;
        }

        if h_parts > 0 {
            let mut res = tape.constant(Array1::zeros(b));
            let lowest = h - h_parts;
            for t in (lowest..h).rev() {
                let st = &bt[t];
                let (_, _, hid, fid) = Self::player_ids(t);
                let h_net = players[hid].net.as_ref();
                let f_net = players[fid].net.as_ref();

                let r_node = tape.constant(st.r.clone());
                let disc = tape.scale(res, self.gamma);
                let y = tape.add(r_node, disc)?;
                let h_obs = tape.net_forward(hid, h_net, &st.wxa_obs)?;
                let f_vals = tape.net_forward(fid, f_net, &st.zxa)?;
                let target = tape.mul_const(y, st.matches.clone())?;
                let diff = tape.sub(h_obs, target)?;
                let df = tape.mul(diff, f_vals)?;
                let m = tape.mul(eta_nodes[t], df)?;
                let m_mean = tape.mean(m);
                obj = tape.add(obj, m_mean)?;

                let eta_det = tape.detach(eta_nodes[t]);
                let h_det = tape.detach(h_obs);
                let target_det = tape.detach(target);
                let diff_det = tape.sub(h_det, target_det)?;
                let weighted_det = tape.mul(eta_det, diff_det)?;
                let part_reg = tape.mul(weighted_det, f_vals)?;
                reg = Some(match reg {
                    Some(acc) => tape.add(acc, part_reg)?,
                    None => part_reg,
                });

                if with_penalties {
                    // Anchor the weighted H values to the mean matched
                    // target; the target stays in the graph so its
                    // gradient reaches the later-stage players through y.
                    let target_w = tape.mul(eta_nodes[t], target)?;
                    let target_mean = tape.mean(target_w);
                    let eta_h = tape.mul(eta_nodes[t], h_obs)?;
                    let dev = tape.sub_broadcast(eta_h, target_mean)?;
                    let dev_sq = tape.square(dev);
                    let dev_mean = tape.mean(dev_sq);
                    let pen0 = tape.scale(dev_mean, self.cfg.y_lmbda.0);
                    obj = tape.add(obj, pen0)?;
                    let eta_h_mean = tape.mean(eta_h);
                    let mean_gap = tape.sub(eta_h_mean, target_mean)?;
                    let mean_gap_sq = tape.square(mean_gap);
                    let pen1 = tape.scale(mean_gap_sq, self.cfg.y_lmbda.1);
                    obj = tape.add(obj, pen1)?;
                }

                // Residual handed to the next lower stage.
                let mut h_sum = tape.net_forward(hid, h_net, &st.wxa_act[0])?;
                for action in 1..self.num_a {
                    let ha = tape.net_forward(hid, h_net, &st.wxa_act[action])?;
                    h_sum = tape.add(h_sum, ha)?;
                }
                let gap = tape.sub(target, h_obs)?;
                let qgap = tape.mul(q_nodes[t], gap)?;
                res = tape.add(qgap, h_sum)?;
            }
        }

        // One shared stabilizer over the summed adversary residuals.
        if let Some(reg) = reg {
            let reg_sq = tape.square(reg);
            let reg_mean = tape.mean(reg_sq);
            let reg_term = tape.scale(reg_mean, 0.25);
            obj = tape.sub(obj, reg_term)?;
        }
        Ok(obj)
    }

    /// Train the joint game and return the fitted bridge functions.
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

        let mut stages = Vec::with_capacity(self.horizon);
        let mut tensors = Vec::with_capacity(self.horizon);
        for t in 0..self.horizon {
            let stage = StageData::from_dataset(ds, t, self.num_a)?;
            tensors.push(StageTensors::from_stage(self.emb.as_ref(), &stage));
            stages.push(stage);
        }

        let mut players = self.build_players(&tensors)?;
        if self.cfg.pretrain {
            self.pretrain(ds, &mut players)?;
        }

        let total_parts = 2 * self.horizon;
        let total_epochs = self.cfg.num_epochs_per_stage * total_parts + self.cfg.num_epochs_final;
        let all_idx: Vec<usize> = (0..n).collect();

        for epoch in 0..total_epochs {
            let num_parts = (epoch / self.cfg.num_epochs_per_stage.max(1) + 1).min(total_parts);
            for idx in BatchIter::new(n, self.cfg.batch_size, &mut self.rng) {
                let bt: Vec<StageTensors> = tensors.iter().map(|st| st.take(&idx)).collect();
                let mut tape = Tape::new(players.len());
                let obj = self.build_objective(&mut tape, &bt, &players, num_parts, true)?;
                let grads = tape.backward(obj)?;
                for (pid, grad) in grads.into_iter().enumerate() {
                    if let Some(mut g) = grad {
                        if players[pid].ascend {
                            g = -g;
                        }
                        let mut theta = players[pid].net.params();
                        players[pid].opt.step(&mut theta, &g)?;
                        players[pid].net.set_params(&theta)?;
                        if !players[pid].net.is_finite() {
                            return Err(EstimError::NonFiniteFit {
                                what: "game player parameters",
                            });
                        }
                    }
                }
            }
            if epoch % self.cfg.eval_every.max(1) == 0 {
                let bt: Vec<StageTensors> = tensors.iter().map(|st| st.take(&all_idx)).collect();
                let mut tape = Tape::new(players.len());
                let obj = self.build_objective(&mut tape, &bt, &players, num_parts, false)?;
                log::info!(
                    "epoch {epoch}: {num_parts}/{total_parts} parts, objective {:+.6e}",
                    tape.value(obj)[0]
                );
            }
        }

        // Package the critics and rethread the weights with the final fits.
        let mut q_fns = Vec::with_capacity(self.horizon);
        let mut h_fns = Vec::with_capacity(self.horizon);
        for t in 0..self.horizon {
            let (qid, _, hid, _) = Self::player_ids(t);
            q_fns.push(NuisanceFn::from_net(
                self.emb.clone(),
                ProxyField::Z,
                players[qid].net.clone_box(),
                1.0,
            ));
            h_fns.push(NuisanceFn::from_net(
                self.emb.clone(),
                ProxyField::W,
                players[hid].net.clone_box(),
                1.0,
            ));
        }
        let mut eta = Array1::from_elem(n, 1.0);
        let mut eta_prevs = Vec::with_capacity(self.horizon);
        for t in 0..self.horizon {
            let stage = &stages[t];
            let x = stage.x.as_ref().map(|x| x.view());
            let q_vals = q_fns[t].eval(&stage.z.view(), x.as_ref(), &stage.a.view())?;
            let next = &eta * &q_vals * stage.eval_match();
            eta_prevs.push(eta);
            eta = next;
        }
        Ok(FittedNuisances { q: q_fns, h: h_fns, eta_prev: eta_prevs, eta_final: eta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::TrajectoryBatch;
    use crate::data::embedding::OneHotEmbedding;
    use ndarray::Array1;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Constructor validation.
    // - A short end-to-end run without pretraining: finite players, fitted
    //   functions for every stage, correct weight threading shape.
    // - A short run with MMR pretraining enabled.
    // -------------------------------------------------------------------------

    fn tiny_batch(n: usize, horizon: usize) -> TrajectoryBatch {
        let mut z = Vec::new();
        let mut w = Vec::new();
        let mut a = Vec::new();
        let mut e = Vec::new();
        let mut r = Vec::new();
        let mut state: u64 = 0x2545F4914F6CDD1D;
        for _ in 0..horizon {
            let mut zt = Array1::zeros(n);
            let mut wt = Array1::zeros(n);
            let mut at = Array1::zeros(n);
            let mut rt = Array1::zeros(n);
            for i in 0..n {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                zt[i] = ((state >> 19) & 1) as f64;
                wt[i] = ((state >> 33) & 1) as f64;
                at[i] = ((state >> 45) & 1) as usize;
                rt[i] = ((state >> 51) & 3) as f64 * 0.25;
            }
            z.push(zt);
            w.push(wt);
            e.push(at.clone());
            a.push(at);
            r.push(rt);
        }
        TrajectoryBatch::new(z, w, None, a, e, r).expect("batch should validate")
    }

    fn short_cfg(pretrain: bool) -> GameConfig {
        GameConfig {
            lr: 1e-2,
            batch_size: 16,
            num_epochs_per_stage: 2,
            num_epochs_final: 2,
            pretrain,
            eval_every: 100,
            ..Default::default()
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure the constructor rejects degenerate configurations.
    //
    // Given
    // -----
    // - Zero horizon, zero actions, and γ = 1.5.
    //
    // Expect
    // ------
    // - `Err(EstimError::InvalidConfig { .. })` for each.
    fn new_rejects_bad_configuration() {
        // Arrange
        let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));

        // Act + Assert
        assert!(matches!(
            JointNuisanceTrainer::new(short_cfg(false), emb.clone(), 0, 0.5, 2),
            Err(EstimError::InvalidConfig { .. })
        ));
        assert!(matches!(
            JointNuisanceTrainer::new(short_cfg(false), emb.clone(), 2, 0.5, 0),
            Err(EstimError::InvalidConfig { .. })
        ));
        assert!(matches!(
            JointNuisanceTrainer::new(short_cfg(false), emb, 2, 1.5, 2),
            Err(EstimError::InvalidConfig { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Run the full curriculum on a tiny two-stage problem without
    // pretraining and check the output structure.
    //
    // Given
    // -----
    // - 32 trajectories over 2 stages, 6 total epochs, batch 16.
    //
    // Expect
    // ------
    // - Two Q and two H fits with finite critics; weights entering stage
    //   0 are all ones; eta vectors have length 32.
    fn short_run_produces_finite_fits() {
        // Arrange
        let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
        let mut trainer = JointNuisanceTrainer::new(short_cfg(false), emb, 2, 0.9, 2)
            .expect("config should validate");
        let batch = tiny_batch(32, 2);

        // Act
        let fits = trainer.fit(&batch).expect("training should run");

        // Assert
        assert_eq!(fits.q.len(), 2);
        assert_eq!(fits.h.len(), 2);
        assert_eq!(fits.eta_prev[0], Array1::from_elem(32, 1.0));
        assert_eq!(fits.eta_final.len(), 32);
        for fit in fits.q.iter().chain(fits.h.iter()) {
            let critic = fit.critic().expect("net-backed fit");
            assert!(critic.params().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure the MMR warm start path runs end to end when the player and
    // pretraining architectures agree.
    //
    // Given
    // -----
    // - A single-stage problem with pretraining enabled and matching
    //   Linear nets.
    //
    // Expect
    // ------
    // - Training completes and produces one fit per direction.
    fn pretrained_run_completes() {
        // Arrange
        let emb: Arc<dyn EmbeddingSet> = Arc::new(OneHotEmbedding::new(2, 2, 2));
        let mut trainer = JointNuisanceTrainer::new(short_cfg(true), emb, 1, 1.0, 2)
            .expect("config should validate");
        let batch = tiny_batch(24, 1);

        // Act
        let fits = trainer.fit(&batch).expect("training should run");

        // Assert
        assert_eq!(fits.q.len(), 1);
        assert_eq!(fits.h.len(), 1);
    }
}
