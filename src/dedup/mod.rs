//! dedup — stable deduplication of covariate tuples.
//!
//! Purpose
//! -------
//! Kernel and tabular estimators repeatedly need the distinct values (or
//! distinct tuples across several columns) observed in a stage, together
//! with a dense code per observation pointing back into the unique set.
//! This module provides that mapping with **first-occurrence order**: the
//! unique set is listed in the order values first appear, so codes are
//! reproducible for a fixed input ordering.
//!
//! Key behaviors
//! -------------
//! - [`unique_values`]: distinct scalars of one column plus per-row codes.
//! - [`unique_rows`]: distinct tuples across several equal-length columns
//!   plus per-row codes; the unique set is returned column-major (one
//!   `Array1` per input field, all of length `k`).
//!
//! Invariants & assumptions
//! ------------------------
//! - Floats are keyed by their IEEE-754 bit patterns. Two values are the
//!   same tuple entry iff their bits match, so `0.0` and `-0.0` are
//!   distinct and `NaN` never merges with anything. Inputs are expected to
//!   be finite; callers validate that upstream.
//! - `codes[i] < k` for every observation `i`, and decoding the uniques at
//!   `codes[i]` reconstructs row `i` exactly.
//!
//! Downstream usage
//! ----------------
//! - The kernel estimators dedup `(z, a)` / `(w, a)` tuples to build Gram
//!   matrices over distinct points only; the discrete estimator dedups
//!   proxy levels to size its tables.
use ndarray::{Array1, ArrayView1};
use std::collections::HashMap;

/// Result alias for deduplication operations.
pub type DedupResult<T> = Result<T, DedupError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupError {
    /// All fields passed to `unique_rows` must have the same length.
    FieldLengthMismatch {
        expected: usize,
        found: usize,
    },
    /// At least one field is required.
    NoFields,
}

impl std::error::Error for DedupError {}

impl std::fmt::Display for DedupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupError::FieldLengthMismatch { expected, found } => {
                write!(f, "Field length mismatch: expected {expected}, found {found}")
            }
            DedupError::NoFields => {
                write!(f, "At least one field is required")
            }
        }
    }
}

/// Deduplicate a single column of floats.
///
/// Returns `(codes, uniques)` where `uniques` lists the distinct values in
/// first-occurrence order and `codes[i]` is the index of `vals[i]` in
/// `uniques`.
pub fn unique_values(vals: &ArrayView1<f64>) -> (Vec<usize>, Array1<f64>) {
    let mut seen: HashMap<u64, usize> = HashMap::new();
    let mut codes = Vec::with_capacity(vals.len());
    let mut uniques = Vec::new();
    for &v in vals.iter() {
        let next = uniques.len();
        let code = *seen.entry(v.to_bits()).or_insert_with(|| {
            uniques.push(v);
            next
        });
        codes.push(code);
    }
    (codes, Array1::from_vec(uniques))
}

/// Deduplicate tuples across several equal-length columns.
///
/// Returns `(codes, uniques)` where `uniques[f]` holds field `f` of each
/// distinct tuple (all of length `k`, first-occurrence order) and
/// `codes[i] < k` identifies the tuple of observation `i`.
///
/// # Errors
/// - [`DedupError::NoFields`] when `fields` is empty.
/// - [`DedupError::FieldLengthMismatch`] when columns disagree in length.
pub fn unique_rows(
    fields: &[ArrayView1<f64>],
) -> DedupResult<(Vec<usize>, Vec<Array1<f64>>)> {
    let first = fields.first().ok_or(DedupError::NoFields)?;
    let n = first.len();
    for field in fields.iter().skip(1) {
        if field.len() != n {
            return Err(DedupError::FieldLengthMismatch { expected: n, found: field.len() });
        }
    }

    let mut seen: HashMap<Vec<u64>, usize> = HashMap::new();
    let mut codes = Vec::with_capacity(n);
    let mut uniques: Vec<Vec<f64>> = vec![Vec::new(); fields.len()];
    let mut count = 0usize;
    for i in 0..n {
        let key: Vec<u64> = fields.iter().map(|f| f[i].to_bits()).collect();
        let code = match seen.get(&key) {
            Some(&c) => c,
            None => {
                for (f, col) in fields.iter().zip(uniques.iter_mut()) {
                    col.push(f[i]);
                }
                seen.insert(key, count);
                count += 1;
                count - 1
            }
        };
        codes.push(code);
    }
    Ok((codes, uniques.into_iter().map(Array1::from_vec).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - First-occurrence ordering of the unique set.
    // - Exact reconstruction of rows via codes (the decode property).
    // - Bit-pattern keying (0.0 vs -0.0).
    // - Field length validation for multi-column dedup.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify that `unique_values` lists distinct values in the order they
    // first appear and codes every row consistently.
    //
    // Given
    // -----
    // - The column [3, 1, 3, 2, 1].
    //
    // Expect
    // ------
    // - uniques = [3, 1, 2]; codes = [0, 1, 0, 2, 1].
    fn unique_values_preserves_first_occurrence_order() {
        // Arrange
        let vals = array![3.0, 1.0, 3.0, 2.0, 1.0];

        // Act
        let (codes, uniques) = unique_values(&vals.view());

        // Assert
        assert_eq!(uniques, array![3.0, 1.0, 2.0]);
        assert_eq!(codes, vec![0, 1, 0, 2, 1]);
    }

    #[test]
    // Purpose
    // -------
    // Verify the decode property: indexing the unique columns by a row's
    // code reproduces the original tuple exactly.
    //
    // Given
    // -----
    // - Two columns forming tuples with duplicates.
    //
    // Expect
    // ------
    // - For every i, (uniques[0][codes[i]], uniques[1][codes[i]]) equals
    //   the original row i, and codes[i] < k.
    fn unique_rows_codes_reconstruct_rows() {
        // Arrange
        let v = array![1.0, 2.0, 1.0, 2.0, 1.0];
        let a = array![0.0, 1.0, 0.0, 0.0, 1.0];

        // Act
        let (codes, uniques) =
            unique_rows(&[v.view(), a.view()]).expect("dedup should succeed");

        // Assert
        let k = uniques[0].len();
        assert_eq!(k, 4, "expected 4 distinct tuples");
        for i in 0..v.len() {
            assert!(codes[i] < k);
            assert_eq!(uniques[0][codes[i]], v[i]);
            assert_eq!(uniques[1][codes[i]], a[i]);
        }
    }

    #[test]
    // Purpose
    // -------
    // Confirm that keying is by bit pattern, so 0.0 and -0.0 are distinct
    // tuple entries.
    //
    // Given
    // -----
    // - The column [0.0, -0.0, 0.0].
    //
    // Expect
    // ------
    // - Two uniques and codes [0, 1, 0].
    fn unique_values_distinguishes_signed_zero() {
        // Arrange
        let vals = array![0.0, -0.0, 0.0];

        // Act
        let (codes, uniques) = unique_values(&vals.view());

        // Assert
        assert_eq!(uniques.len(), 2);
        assert_eq!(codes, vec![0, 1, 0]);
    }

    #[test]
    // Purpose
    // -------
    // Ensure mismatched column lengths are rejected.
    //
    // Given
    // -----
    // - A length-3 column and a length-2 column.
    //
    // Expect
    // ------
    // - `Err(DedupError::FieldLengthMismatch { expected: 3, found: 2 })`.
    fn unique_rows_rejects_length_mismatch() {
        // Arrange
        let v = array![1.0, 2.0, 3.0];
        let a = array![0.0, 1.0];

        // Act
        let res = unique_rows(&[v.view(), a.view()]);

        // Assert
        assert_eq!(res, Err(DedupError::FieldLengthMismatch { expected: 3, found: 2 }));
    }
}
