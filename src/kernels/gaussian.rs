//! kernels::gaussian — Gaussian kernels with median-heuristic tuning.
//!
//! Purpose
//! -------
//! Provide the two positive semidefinite kernels the estimators use over
//! embedded covariate rows: a single Gaussian ([`RbfKernel`]) and a mixture
//! of three Gaussians at spread bandwidths ([`TripleMedianKernel`]). Both
//! tune themselves from a representative sample via the median heuristic:
//! the base squared-distance scale is the median of pairwise squared
//! distances in the sample.
//!
//! Invariants & assumptions
//! ------------------------
//! - `tune` must be called once before `gram`; the tuned bandwidth is finite
//!   and strictly positive (a degenerate sample falls back to 1.0).
//! - Gram entries are `exp(-d² / (2σ))` with `d²` the squared Euclidean
//!   distance and `σ` the tuned scale, so values lie in `(0, 1]` and the
//!   matrix is symmetric PSD when rows == cols.
use ndarray::{Array2, ArrayView2};

use crate::kernels::errors::{KernelError, KernelResult};

/// Bandwidth multipliers of the triple-median mixture.
const TRIPLE_SCALES: [f64; 3] = [0.5, 1.0, 2.0];

/// Positive semidefinite kernel over embedded rows.
///
/// Implementations are tuned once per stage from a representative sample and
/// then evaluated into Gram matrices between arbitrary row sets.
pub trait PsdKernel {
    /// Tune internal bandwidths from a sample of embedded rows.
    fn tune(&mut self, sample: &ArrayView2<f64>) -> KernelResult<()>;

    /// Gram matrix `K[i, j] = k(rows_i, cols_j)`.
    ///
    /// # Errors
    /// - [`KernelError::NotTuned`] before `tune`.
    /// - [`KernelError::DimMismatch`] when the embedded dimensions differ.
    fn gram(&self, rows: &ArrayView2<f64>, cols: &ArrayView2<f64>) -> KernelResult<Array2<f64>>;

    /// Clone into a boxed trait object (kernels travel inside fitted
    /// nuisance functions).
    fn clone_box(&self) -> Box<dyn PsdKernel>;
}

impl Clone for Box<dyn PsdKernel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Tagged kernel configuration; estimators build fresh instances per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Rbf,
    TripleMedian,
}

impl KernelKind {
    pub fn build(&self) -> Box<dyn PsdKernel> {
        match self {
            KernelKind::Rbf => Box::new(RbfKernel::new()),
            KernelKind::TripleMedian => Box::new(TripleMedianKernel::new()),
        }
    }
}

/// Pairwise squared Euclidean distances between two row sets.
///
/// Returns an `a.nrows() × b.nrows()` matrix. Dimensions must agree; callers
/// validate through the kernel entry points.
pub fn sq_cdist(a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((a.nrows(), b.nrows()));
    for (i, ra) in a.rows().into_iter().enumerate() {
        for (j, rb) in b.rows().into_iter().enumerate() {
            let mut d2 = 0.0;
            for (&x, &y) in ra.iter().zip(rb.iter()) {
                let d = x - y;
                d2 += d * d;
            }
            out[(i, j)] = d2;
        }
    }
    out
}

/// Median of the strictly positive pairwise squared distances in a sample.
///
/// Falls back to 1.0 when the sample has fewer than two rows or collapses
/// to a single point.
fn median_sq_dist(sample: &ArrayView2<f64>) -> f64 {
    let n = sample.nrows();
    let mut dists = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let mut d2 = 0.0;
            for (&x, &y) in sample.row(i).iter().zip(sample.row(j).iter()) {
                let d = x - y;
                d2 += d * d;
            }
            if d2 > 0.0 {
                dists.push(d2);
            }
        }
    }
    if dists.is_empty() {
        return 1.0;
    }
    dists.sort_by(|a, b| a.total_cmp(b));
    let mid = dists.len() / 2;
    if dists.len() % 2 == 0 { (dists[mid - 1] + dists[mid]) / 2.0 } else { dists[mid] }
}

/// Single Gaussian kernel with a median-heuristic bandwidth.
#[derive(Debug, Clone, Default)]
pub struct RbfKernel {
    bandwidth: Option<f64>,
}

impl RbfKernel {
    pub fn new() -> Self {
        Self { bandwidth: None }
    }
}

impl PsdKernel for RbfKernel {
    fn tune(&mut self, sample: &ArrayView2<f64>) -> KernelResult<()> {
        if sample.nrows() == 0 {
            return Err(KernelError::EmptySample);
        }
        let bw = median_sq_dist(sample);
        if !bw.is_finite() || bw <= 0.0 {
            return Err(KernelError::InvalidBandwidth { value: bw });
        }
        self.bandwidth = Some(bw);
        Ok(())
    }

    fn gram(&self, rows: &ArrayView2<f64>, cols: &ArrayView2<f64>) -> KernelResult<Array2<f64>> {
        let bw = self.bandwidth.ok_or(KernelError::NotTuned)?;
        if rows.ncols() != cols.ncols() {
            return Err(KernelError::DimMismatch {
                rows_dim: rows.ncols(),
                cols_dim: cols.ncols(),
            });
        }
        let d2 = sq_cdist(rows, cols);
        Ok(d2.mapv(|d| (-d / (2.0 * bw)).exp()))
    }

    fn clone_box(&self) -> Box<dyn PsdKernel> {
        Box::new(self.clone())
    }
}

/// Mixture of three Gaussians at {0.5, 1, 2} times the median bandwidth.
///
/// The spread covers under- and over-smoothing around the median heuristic,
/// which keeps the Gram matrices informative when the proxy scale is off.
#[derive(Debug, Clone, Default)]
pub struct TripleMedianKernel {
    bandwidth: Option<f64>,
}

impl TripleMedianKernel {
    pub fn new() -> Self {
        Self { bandwidth: None }
    }
}

impl PsdKernel for TripleMedianKernel {
    fn tune(&mut self, sample: &ArrayView2<f64>) -> KernelResult<()> {
        if sample.nrows() == 0 {
            return Err(KernelError::EmptySample);
        }
        let bw = median_sq_dist(sample);
        if !bw.is_finite() || bw <= 0.0 {
            return Err(KernelError::InvalidBandwidth { value: bw });
        }
        self.bandwidth = Some(bw);
        Ok(())
    }

    fn gram(&self, rows: &ArrayView2<f64>, cols: &ArrayView2<f64>) -> KernelResult<Array2<f64>> {
        let bw = self.bandwidth.ok_or(KernelError::NotTuned)?;
        if rows.ncols() != cols.ncols() {
            return Err(KernelError::DimMismatch {
                rows_dim: rows.ncols(),
                cols_dim: cols.ncols(),
            });
        }
        let d2 = sq_cdist(rows, cols);
        let weight = 1.0 / TRIPLE_SCALES.len() as f64;
        Ok(d2.mapv(|d| {
            TRIPLE_SCALES.iter().map(|s| (-d / (2.0 * s * bw)).exp()).sum::<f64>() * weight
        }))
    }

    fn clone_box(&self) -> Box<dyn PsdKernel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Squared-distance algebra.
    // - Tune-before-gram enforcement.
    // - Gram value range (0, 1], unit diagonal, and symmetry.
    // - Degenerate-sample bandwidth fallback.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify pairwise squared distances against hand-computed values.
    //
    // Given
    // -----
    // - Rows (0,0), (3,4) against cols (0,0).
    //
    // Expect
    // ------
    // - Distances [0, 25].
    fn sq_cdist_matches_hand_computation() {
        // Arrange
        let a = array![[0.0, 0.0], [3.0, 4.0]];
        let b = array![[0.0, 0.0]];

        // Act
        let d2 = sq_cdist(&a.view(), &b.view());

        // Assert
        assert_eq!(d2, array![[0.0], [25.0]]);
    }

    #[test]
    // Purpose
    // -------
    // Ensure `gram` refuses to run before `tune`.
    //
    // Given
    // -----
    // - A fresh RBF kernel.
    //
    // Expect
    // ------
    // - `Err(KernelError::NotTuned)`.
    fn gram_requires_tuning() {
        // Arrange
        let kernel = RbfKernel::new();
        let pts = array![[0.0], [1.0]];

        // Act
        let res = kernel.gram(&pts.view(), &pts.view());

        // Assert
        assert_eq!(res, Err(KernelError::NotTuned));
    }

    #[test]
    // Purpose
    // -------
    // Verify the tuned Gaussian Gram matrix has a unit diagonal, values in
    // (0, 1], and is symmetric.
    //
    // Given
    // -----
    // - Three 1-D points tuned on themselves.
    //
    // Expect
    // ------
    // - K[i,i] = 1, 0 < K[i,j] <= 1, K[i,j] = K[j,i].
    fn rbf_gram_is_symmetric_with_unit_diagonal() {
        // Arrange
        let pts = array![[0.0], [1.0], [3.0]];
        let mut kernel = RbfKernel::new();
        kernel.tune(&pts.view()).expect("tune should succeed");

        // Act
        let k = kernel.gram(&pts.view(), &pts.view()).expect("gram should succeed");

        // Assert
        for i in 0..3 {
            assert!((k[(i, i)] - 1.0).abs() < 1e-12);
            for j in 0..3 {
                assert!(k[(i, j)] > 0.0 && k[(i, j)] <= 1.0);
                assert!((k[(i, j)] - k[(j, i)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify the triple-median mixture also produces a unit diagonal and
    // larger off-diagonal mass than a single Gaussian at the same distance
    // scale (the widest component dominates far pairs).
    //
    // Given
    // -----
    // - Two distant points tuned on themselves.
    //
    // Expect
    // ------
    // - Both kernels give K[0,0] = 1; the mixture's K[0,1] exceeds the
    //   single Gaussian's value at a distance above the median.
    fn triple_median_spreads_bandwidths() {
        // Arrange
        let pts = array![[0.0], [1.0], [5.0]];
        let mut single = RbfKernel::new();
        let mut triple = TripleMedianKernel::new();
        single.tune(&pts.view()).expect("tune should succeed");
        triple.tune(&pts.view()).expect("tune should succeed");
        let far = array![[0.0], [5.0]];

        // Act
        let ks = single.gram(&far.view(), &far.view()).expect("gram should succeed");
        let kt = triple.gram(&far.view(), &far.view()).expect("gram should succeed");

        // Assert
        assert!((kt[(0, 0)] - 1.0).abs() < 1e-12);
        assert!(kt[(0, 1)] > ks[(0, 1)], "wide component should lift far-pair similarity");
    }

    #[test]
    // Purpose
    // -------
    // Check the degenerate-sample fallback: a single repeated point still
    // tunes (bandwidth 1.0) rather than failing or producing zero.
    //
    // Given
    // -----
    // - A sample of two identical rows.
    //
    // Expect
    // ------
    // - `tune` succeeds and `gram` of the point with itself is 1.
    fn tune_falls_back_on_degenerate_sample() {
        // Arrange
        let pts = array![[2.0], [2.0]];
        let mut kernel = RbfKernel::new();

        // Act
        kernel.tune(&pts.view()).expect("degenerate tune should fall back");
        let k = kernel.gram(&pts.view(), &pts.view()).expect("gram should succeed");

        // Assert
        assert!((k[(0, 1)] - 1.0).abs() < 1e-12);
    }
}
