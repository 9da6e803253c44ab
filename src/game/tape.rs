//! game::tape — minimal reverse-mode tape over vector nodes.
//!
//! Purpose
//! -------
//! The joint game differentiates one scalar objective with respect to the
//! parameters of many players at once, through expressions (weight
//! threading, discounted residuals) that couple the players. This module
//! provides exactly the vector algebra that objective needs: eager forward
//! values over `Array1<f64>` nodes and a single reverse sweep that folds
//! adjoints into per-player parameter gradients through
//! [`CriticNet::param_grad`].
//!
//! Key behaviors
//! -------------
//! - Nodes are appended in topological order; [`Tape::backward`] consumes
//!   the tape, so all borrows of player nets end before the trainer steps
//!   their optimizers.
//! - One backward sweep collects the gradients of every player that
//!   appears in the graph, which is what simultaneous-gradient play needs:
//!   all gradients are taken at the same parameters before any update.
//! - [`Tape::detach`] passes the value forward and blocks the adjoint, the
//!   tool for adversary regularizers that must not shape the fitted
//!   players.
//!
//! Invariants & assumptions
//! ------------------------
//! - The objective node must have length one.
//! - Binary ops require equal lengths; mismatches surface as
//!   [`OptError::GradientDimMismatch`] at construction, not in backward.
use ndarray::{Array1, Array2};

use crate::critics::CriticNet;
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::Grad,
};

/// Handle to a tape node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

enum Op<'a> {
    /// Leaf with a fixed value.
    Const,
    /// Batched forward pass of one player's net; backward folds the
    /// adjoint into that player's parameter gradient.
    NetForward { player: usize, net: &'a dyn CriticNet, inputs: &'a Array2<f64> },
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    /// Elementwise product with a fixed vector.
    MulConst(NodeId, Array1<f64>),
    Scale(NodeId, f64),
    AddScalar(NodeId),
    /// Subtract a length-one node from every entry.
    SubBroadcast(NodeId, NodeId),
    /// Mean over the vector, producing a length-one node.
    Mean(NodeId),
    Square(NodeId),
    /// Identity forward, zero backward.
    Detach(NodeId),
}

struct Node<'a> {
    op: Op<'a>,
    value: Array1<f64>,
}

/// Append-only computation tape for one objective evaluation.
pub struct Tape<'a> {
    nodes: Vec<Node<'a>>,
    num_players: usize,
}

impl<'a> Tape<'a> {
    pub fn new(num_players: usize) -> Self {
        Self { nodes: Vec::new(), num_players }
    }

    fn push(&mut self, op: Op<'a>, value: Array1<f64>) -> NodeId {
        self.nodes.push(Node { op, value });
        NodeId(self.nodes.len() - 1)
    }

    fn same_len(&self, a: NodeId, b: NodeId) -> OptResult<()> {
        let la = self.nodes[a.0].value.len();
        let lb = self.nodes[b.0].value.len();
        if la != lb {
            return Err(OptError::GradientDimMismatch { expected: la, found: lb });
        }
        Ok(())
    }

    /// Forward value of a node.
    pub fn value(&self, id: NodeId) -> &Array1<f64> {
        &self.nodes[id.0].value
    }

    pub fn constant(&mut self, v: Array1<f64>) -> NodeId {
        self.push(Op::Const, v)
    }

    /// Evaluate `net` on `inputs` at its current parameters and register
    /// the output as a differentiable node owned by `player`.
    pub fn net_forward(
        &mut self, player: usize, net: &'a dyn CriticNet, inputs: &'a Array2<f64>,
    ) -> OptResult<NodeId> {
        if player >= self.num_players {
            return Err(OptError::GradientDimMismatch {
                expected: self.num_players,
                found: player,
            });
        }
        let value = net.forward(&inputs.view());
        Ok(self.push(Op::NetForward { player, net, inputs }, value))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> OptResult<NodeId> {
        self.same_len(a, b)?;
        let value = &self.nodes[a.0].value + &self.nodes[b.0].value;
        Ok(self.push(Op::Add(a, b), value))
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> OptResult<NodeId> {
        self.same_len(a, b)?;
        let value = &self.nodes[a.0].value - &self.nodes[b.0].value;
        Ok(self.push(Op::Sub(a, b), value))
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> OptResult<NodeId> {
        self.same_len(a, b)?;
        let value = &self.nodes[a.0].value * &self.nodes[b.0].value;
        Ok(self.push(Op::Mul(a, b), value))
    }

    pub fn mul_const(&mut self, a: NodeId, c: Array1<f64>) -> OptResult<NodeId> {
        if self.nodes[a.0].value.len() != c.len() {
            return Err(OptError::GradientDimMismatch {
                expected: self.nodes[a.0].value.len(),
                found: c.len(),
            });
        }
        let value = &self.nodes[a.0].value * &c;
        Ok(self.push(Op::MulConst(a, c), value))
    }

    pub fn scale(&mut self, a: NodeId, s: f64) -> NodeId {
        let value = &self.nodes[a.0].value * s;
        self.push(Op::Scale(a, s), value)
    }

    pub fn add_scalar(&mut self, a: NodeId, s: f64) -> NodeId {
        let value = &self.nodes[a.0].value + s;
        self.push(Op::AddScalar(a), value)
    }

    /// Subtract the scalar node `s` from every entry of `a`.
    pub fn sub_broadcast(&mut self, a: NodeId, s: NodeId) -> OptResult<NodeId> {
        if self.nodes[s.0].value.len() != 1 {
            return Err(OptError::GradientDimMismatch {
                expected: 1,
                found: self.nodes[s.0].value.len(),
            });
        }
        let value = &self.nodes[a.0].value - self.nodes[s.0].value[0];
        Ok(self.push(Op::SubBroadcast(a, s), value))
    }

    pub fn mean(&mut self, a: NodeId) -> NodeId {
        let value = Array1::from_elem(1, self.nodes[a.0].value.mean().unwrap_or(0.0));
        self.push(Op::Mean(a), value)
    }

    pub fn square(&mut self, a: NodeId) -> NodeId {
        let value = self.nodes[a.0].value.mapv(|v| v * v);
        self.push(Op::Square(a), value)
    }

    pub fn detach(&mut self, a: NodeId) -> NodeId {
        let value = self.nodes[a.0].value.clone();
        self.push(Op::Detach(a), value)
    }

    /// Reverse sweep from `obj`, consuming the tape.
    ///
    /// Returns one gradient per player (None for players absent from the
    /// graph), all taken at the parameters the nets held during forward
    /// construction.
    ///
    /// # Errors
    /// - [`OptError::GradientDimMismatch`] if `obj` is not a scalar node.
    /// - Errors from [`CriticNet::param_grad`] pass through.
    pub fn backward(self, obj: NodeId) -> OptResult<Vec<Option<Grad>>> {
        let Tape { nodes, num_players } = self;
        if nodes[obj.0].value.len() != 1 {
            return Err(OptError::GradientDimMismatch {
                expected: 1,
                found: nodes[obj.0].value.len(),
            });
        }
        let mut adj: Vec<Array1<f64>> =
            nodes.iter().map(|n| Array1::zeros(n.value.len())).collect();
        adj[obj.0][0] = 1.0;
        let mut grads: Vec<Option<Grad>> = vec![None; num_players];

        for id in (0..nodes.len()).rev() {
            if adj[id].iter().all(|&v| v == 0.0) {
                continue;
            }
            let a = adj[id].clone();
            match &nodes[id].op {
                Op::Const | Op::Detach(_) => {}
                Op::NetForward { player, net, inputs } => {
                    let g = net.param_grad(&net.params(), &inputs.view(), &a)?;
                    match &mut grads[*player] {
                        Some(acc) => *acc += &g,
                        None => grads[*player] = Some(g),
                    }
                }
                Op::Add(x, y) => {
                    adj[x.0] += &a;
                    adj[y.0] += &a;
                }
                Op::Sub(x, y) => {
                    adj[x.0] += &a;
                    adj[y.0] -= &a;
                }
                Op::Mul(x, y) => {
                    let gx = &a * &nodes[y.0].value;
                    let gy = &a * &nodes[x.0].value;
                    adj[x.0] += &gx;
                    adj[y.0] += &gy;
                }
                Op::MulConst(x, c) => {
                    adj[x.0] += &(&a * c);
                }
                Op::Scale(x, s) => {
                    adj[x.0] += &(&a * *s);
                }
                Op::AddScalar(x) => {
                    adj[x.0] += &a;
                }
                Op::SubBroadcast(x, s) => {
                    adj[x.0] += &a;
                    adj[s.0][0] -= a.sum();
                }
                Op::Mean(x) => {
                    let k = nodes[x.0].value.len() as f64;
                    adj[x.0] += a[0] / k;
                }
                Op::Square(x) => {
                    let g = &a * &(2.0 * &nodes[x.0].value);
                    adj[x.0] += &g;
                }
            }
        }
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critics::LinearCritic;
    use crate::optimization::minimizer::Theta;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Backward through a composite expression against finite differences.
    // - Adjoint blocking through detach.
    // - Gradient accumulation across two uses of the same player.
    // - Scalar-objective validation.
    // -------------------------------------------------------------------------

    fn critic_and_inputs() -> (LinearCritic, Array2<f64>) {
        let mut rng = StdRng::seed_from_u64(11);
        let net = LinearCritic::new(2, &mut rng);
        let inputs = array![[1.0, 0.5], [-0.5, 2.0], [0.0, 1.0]];
        (net, inputs)
    }

    fn objective(net: &LinearCritic, theta: &Theta, inputs: &Array2<f64>) -> f64 {
        // mean((w ∘ f)²) − 0.5·mean(f + 1), matching the tape program in
        // backward_matches_finite_differences.
        let f = net.forward_with(theta, &inputs.view()).expect("forward");
        let w = array![2.0, -1.0, 0.5];
        let sq = (&w * &f).mapv(|v| v * v);
        sq.mean().unwrap_or(0.0) - 0.5 * (f + 1.0).mean().unwrap_or(0.0)
    }

    #[test]
    // Purpose
    // -------
    // Verify the reverse sweep against central finite differences on a
    // composite expression using mul_const, square, mean, add_scalar,
    // scale, and sub.
    //
    // Given
    // -----
    // - A 3-parameter affine critic and a fixed 3-row input batch.
    //
    // Expect
    // ------
    // - Tape gradient within 1e-6 of the finite-difference gradient.
    fn backward_matches_finite_differences() {
        // Arrange
        let (net, inputs) = critic_and_inputs();
        let theta = net.params();

        // Act
        let mut tape = Tape::new(1);
        let f = tape.net_forward(0, &net, &inputs).expect("node");
        let wf = tape.mul_const(f, array![2.0, -1.0, 0.5]).expect("node");
        let sq = tape.square(wf);
        let lhs = tape.mean(sq);
        let shifted = tape.add_scalar(f, 1.0);
        let m = tape.mean(shifted);
        let rhs = tape.scale(m, 0.5);
        let obj = tape.sub(lhs, rhs).expect("node");
        let obj_val = tape.value(obj)[0];
        let grads = tape.backward(obj).expect("backward");
        let grad = grads[0].clone().expect("player 0 gradient");

        // Assert
        assert!((obj_val - objective(&net, &theta, &inputs)).abs() < 1e-12);
        let h = 1e-6;
        for k in 0..theta.len() {
            let mut up = theta.clone();
            let mut dn = theta.clone();
            up[k] += h;
            dn[k] -= h;
            let fd = (objective(&net, &up, &inputs) - objective(&net, &dn, &inputs)) / (2.0 * h);
            assert!((grad[k] - fd).abs() < 1e-6, "param {k}: tape {} vs fd {fd}", grad[k]);
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify detach blocks the adjoint: an objective built only from a
    // detached copy produces no gradient for the player.
    //
    // Given
    // -----
    // - obj = mean(detach(f)²).
    //
    // Expect
    // ------
    // - backward returns None for the player.
    fn detach_blocks_gradient_flow() {
        // Arrange
        let (net, inputs) = critic_and_inputs();

        // Act
        let mut tape = Tape::new(1);
        let f = tape.net_forward(0, &net, &inputs).expect("node");
        let d = tape.detach(f);
        let sq = tape.square(d);
        let obj = tape.mean(sq);
        let grads = tape.backward(obj).expect("backward");

        // Assert
        assert!(grads[0].is_none());
    }

    #[test]
    // Purpose
    // -------
    // Two uses of the same player must accumulate into one gradient equal
    // to the sum of the single-use gradients.
    //
    // Given
    // -----
    // - obj = mean(f) + mean(f) versus obj = scale(mean(f), 2).
    //
    // Expect
    // ------
    // - Identical gradients from both programs.
    fn gradients_accumulate_across_uses() {
        // Arrange
        let (net, inputs) = critic_and_inputs();

        // Act
        let mut tape_a = Tape::new(1);
        let f = tape_a.net_forward(0, &net, &inputs).expect("node");
        let m = tape_a.mean(f);
        let obj_a = tape_a.add(m, m).expect("node");
        let grad_a = tape_a.backward(obj_a).expect("backward")[0].clone().expect("grad");

        let mut tape_b = Tape::new(1);
        let f = tape_b.net_forward(0, &net, &inputs).expect("node");
        let m = tape_b.mean(f);
        let obj_b = tape_b.scale(m, 2.0);
        let grad_b = tape_b.backward(obj_b).expect("backward")[0].clone().expect("grad");

        // Assert
        for k in 0..grad_a.len() {
            assert!((grad_a[k] - grad_b[k]).abs() < 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify sub_broadcast routes adjoints to both the vector and the
    // scalar side by differentiating the batch variance of a critic.
    //
    // Given
    // -----
    // - obj = mean((f − mean(f))²).
    //
    // Expect
    // ------
    // - Tape gradient within 1e-6 of the finite-difference gradient.
    fn sub_broadcast_matches_finite_differences() {
        // Arrange
        let (net, inputs) = critic_and_inputs();
        let theta = net.params();
        let variance = |theta: &Theta| {
            let f = net.forward_with(theta, &inputs.view()).expect("forward");
            let m = f.mean().unwrap_or(0.0);
            f.mapv(|v| (v - m) * (v - m)).mean().unwrap_or(0.0)
        };

        // Act
        let mut tape = Tape::new(1);
        let f = tape.net_forward(0, &net, &inputs).expect("node");
        let m = tape.mean(f);
        let centered = tape.sub_broadcast(f, m).expect("node");
        let sq = tape.square(centered);
        let obj = tape.mean(sq);
        let obj_val = tape.value(obj)[0];
        let grad = tape.backward(obj).expect("backward")[0].clone().expect("grad");

        // Assert
        assert!((obj_val - variance(&theta)).abs() < 1e-12);
        let h = 1e-6;
        for k in 0..theta.len() {
            let mut up = theta.clone();
            let mut dn = theta.clone();
            up[k] += h;
            dn[k] -= h;
            let fd = (variance(&up) - variance(&dn)) / (2.0 * h);
            assert!((grad[k] - fd).abs() < 1e-6, "param {k}: tape {} vs fd {fd}", grad[k]);
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure backward rejects non-scalar objectives.
    //
    // Given
    // -----
    // - A length-3 node used as the objective.
    //
    // Expect
    // ------
    // - `Err(OptError::GradientDimMismatch { expected: 1, .. })`.
    fn backward_rejects_vector_objective() {
        // Arrange
        let mut tape = Tape::new(0);
        let v = tape.constant(array![1.0, 2.0, 3.0]);

        // Act
        let res = tape.backward(v);

        // Assert
        assert!(matches!(res, Err(OptError::GradientDimMismatch { expected: 1, found: 3 })));
    }
}
