//! estimators::solve — ndarray/nalgebra bridge for dense ridge systems.
//!
//! The estimators assemble their normal equations in `ndarray` and solve
//! them through `nalgebra`'s LU factorization. Singular systems are
//! reported as [`EstimError::SingularSystem`] so the ridge-escalation
//! loops can react instead of propagating NaN.
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2};

use crate::estimators::errors::{EstimError, EstimResult};

/// Copy an `ndarray` matrix into a freshly allocated `DMatrix`.
pub fn to_dmatrix(a: &ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Invert a square matrix, reporting singularity under the given label.
///
/// # Errors
/// [`EstimError::SingularSystem`] when the matrix has no inverse.
pub fn invert(a: &ArrayView2<f64>, what: &'static str) -> EstimResult<Array2<f64>> {
    let m = to_dmatrix(a);
    match m.try_inverse() {
        Some(inv) => Ok(from_dmatrix(&inv)),
        None => Err(EstimError::SingularSystem { what }),
    }
}

/// Solve `A · X = B` for a matrix right-hand side.
///
/// # Errors
/// [`EstimError::SingularSystem`] when the factorization fails.
pub fn solve_matrix(
    a: &ArrayView2<f64>, b: &ArrayView2<f64>, what: &'static str,
) -> EstimResult<Array2<f64>> {
    let lu = to_dmatrix(a).lu();
    match lu.solve(&to_dmatrix(b)) {
        Some(x) => Ok(from_dmatrix(&x)),
        None => Err(EstimError::SingularSystem { what }),
    }
}

/// Solve `A · x = b` for a vector right-hand side.
///
/// # Errors
/// [`EstimError::SingularSystem`] when the factorization fails.
pub fn solve_vector(
    a: &ArrayView2<f64>, b: &Array1<f64>, what: &'static str,
) -> EstimResult<Array1<f64>> {
    let lu = to_dmatrix(a).lu();
    let rhs = DMatrix::from_fn(b.len(), 1, |i, _| b[i]);
    match lu.solve(&rhs) {
        Some(x) => Ok(Array1::from_iter((0..b.len()).map(|i| x[(i, 0)]))),
        None => Err(EstimError::SingularSystem { what }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests check the bridge round trip: known inverses and solves,
    // plus singular detection.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify a hand-checkable 2x2 solve.
    //
    // Given
    // -----
    // - A = [[2, 0], [0, 4]], b = (2, 8).
    //
    // Expect
    // ------
    // - x = (1, 2).
    fn solve_vector_matches_hand_computation() {
        // Arrange
        let a = array![[2.0, 0.0], [0.0, 4.0]];
        let b = array![2.0, 8.0];

        // Act
        let x = solve_vector(&a.view(), &b, "test").expect("solve should succeed");

        // Assert
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Ensure singular matrices are reported, not silently inverted.
    //
    // Given
    // -----
    // - A rank-1 2x2 matrix.
    //
    // Expect
    // ------
    // - `Err(EstimError::SingularSystem { what: "rank1" })`.
    fn invert_detects_singularity() {
        // Arrange
        let a = array![[1.0, 2.0], [2.0, 4.0]];

        // Act
        let res = invert(&a.view(), "rank1");

        // Assert
        assert_eq!(res, Err(EstimError::SingularSystem { what: "rank1" }));
    }

    #[test]
    // Purpose
    // -------
    // Verify inverse round trip: A · A⁻¹ ≈ I.
    //
    // Given
    // -----
    // - A well-conditioned 2x2 matrix.
    //
    // Expect
    // ------
    // - Product within 1e-10 of identity.
    fn invert_round_trips() {
        // Arrange
        let a = array![[3.0, 1.0], [1.0, 2.0]];

        // Act
        let inv = invert(&a.view(), "test").expect("invert should succeed");
        let prod = a.dot(&inv);

        // Assert
        assert!((prod[(0, 0)] - 1.0).abs() < 1e-10);
        assert!((prod[(1, 1)] - 1.0).abs() < 1e-10);
        assert!(prod[(0, 1)].abs() < 1e-10);
        assert!(prod[(1, 0)].abs() < 1e-10);
    }
}
