//! data::dataset — validated trajectory containers and per-stage snapshots.
//!
//! Purpose
//! -------
//! Hold a batch of observed trajectories in column-major per-stage form and
//! expose them to the estimators through the [`PciDataset`] accessor trait.
//! Construction is fail-fast: shapes, finiteness, and action ranges are
//! checked once in [`TrajectoryBatch::new`], so downstream code can assume
//! clean inputs.
//!
//! Key behaviors
//! -------------
//! - [`TrajectoryBatch`]: owned container over stages `0..horizon`, each
//!   stage holding columns of length `n` for the future proxy `z`, the past
//!   proxy `w`, an optional context `x`, actions `a`, evaluation actions
//!   `e`, and rewards `r`.
//! - [`PciDataset`]: read-only accessor contract the orchestrators fit
//!   against; any source of trajectories (simulators, replay buffers) can
//!   implement it.
//! - [`StageData`]: owned snapshot of one stage plus the action-space size,
//!   the unit the per-stage estimators consume.
//!
//! Invariants & assumptions
//! ------------------------
//! - All float columns are finite; all action codes lie in `0..num_a` once
//!   a `StageData` has been constructed.
//! - `PciDataset` accessors take a stage index `t` that callers keep below
//!   `horizon()`; `StageData::from_dataset` validates this before touching
//!   the views.
use ndarray::{Array1, ArrayView1};

use crate::data::errors::{DataError, DataResult};

/// Read-only accessor contract for a batch of trajectories.
///
/// All stage-indexed methods expect `t < horizon()`; `StageData` validates
/// this once per fit.
pub trait PciDataset {
    /// Number of trajectories in the batch.
    fn n(&self) -> usize;
    /// Number of decision stages per trajectory.
    fn horizon(&self) -> usize;
    /// Future-facing proxy column at stage `t`.
    fn z(&self, t: usize) -> ArrayView1<'_, f64>;
    /// Past-facing proxy column at stage `t`.
    fn w(&self, t: usize) -> ArrayView1<'_, f64>;
    /// Optional observed context column at stage `t`.
    fn x(&self, t: usize) -> Option<ArrayView1<'_, f64>>;
    /// Logged action codes at stage `t`.
    fn a(&self, t: usize) -> ArrayView1<'_, usize>;
    /// Evaluation-policy action codes at stage `t`.
    fn e(&self, t: usize) -> ArrayView1<'_, usize>;
    /// Observed rewards at stage `t`.
    fn r(&self, t: usize) -> ArrayView1<'_, f64>;
}

/// Owned, validated batch of trajectories in per-stage column form.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryBatch {
    z: Vec<Array1<f64>>,
    w: Vec<Array1<f64>>,
    x: Option<Vec<Array1<f64>>>,
    a: Vec<Array1<usize>>,
    e: Vec<Array1<usize>>,
    r: Vec<Array1<f64>>,
    n: usize,
    horizon: usize,
}

impl TrajectoryBatch {
    /// Construct a validated batch.
    ///
    /// # Rules
    /// - Every field must cover the same horizon (`z` sets the reference).
    /// - Every stage column must have the same length `n >= 1`.
    /// - Float columns (`z`, `w`, `x`, `r`) must be finite throughout.
    ///
    /// # Errors
    /// - [`DataError::EmptyBatch`] for a zero horizon or zero trajectories.
    /// - [`DataError::HorizonMismatch`] / [`DataError::LengthMismatch`] for
    ///   ragged inputs.
    /// - [`DataError::NonFiniteValue`] for NaN or infinite floats.
    pub fn new(
        z: Vec<Array1<f64>>, w: Vec<Array1<f64>>, x: Option<Vec<Array1<f64>>>,
        a: Vec<Array1<usize>>, e: Vec<Array1<usize>>, r: Vec<Array1<f64>>,
    ) -> DataResult<Self> {
        let horizon = z.len();
        if horizon == 0 {
            return Err(DataError::EmptyBatch);
        }
        let n = z[0].len();
        if n == 0 {
            return Err(DataError::EmptyBatch);
        }

        check_float_field("z", &z, horizon, n)?;
        check_float_field("w", &w, horizon, n)?;
        if let Some(x) = &x {
            check_float_field("x", x, horizon, n)?;
        }
        check_float_field("r", &r, horizon, n)?;
        check_code_field("a", &a, horizon, n)?;
        check_code_field("e", &e, horizon, n)?;

        Ok(Self { z, w, x, a, e, r, n, horizon })
    }
}

impl PciDataset for TrajectoryBatch {
    fn n(&self) -> usize {
        self.n
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn z(&self, t: usize) -> ArrayView1<'_, f64> {
        self.z[t].view()
    }

    fn w(&self, t: usize) -> ArrayView1<'_, f64> {
        self.w[t].view()
    }

    fn x(&self, t: usize) -> Option<ArrayView1<'_, f64>> {
        self.x.as_ref().map(|x| x[t].view())
    }

    fn a(&self, t: usize) -> ArrayView1<'_, usize> {
        self.a[t].view()
    }

    fn e(&self, t: usize) -> ArrayView1<'_, usize> {
        self.e[t].view()
    }

    fn r(&self, t: usize) -> ArrayView1<'_, f64> {
        self.r[t].view()
    }
}

fn check_float_field(
    field: &'static str, cols: &[Array1<f64>], horizon: usize, n: usize,
) -> DataResult<()> {
    if cols.len() != horizon {
        return Err(DataError::HorizonMismatch { field, expected: horizon, found: cols.len() });
    }
    for (stage, col) in cols.iter().enumerate() {
        if col.len() != n {
            return Err(DataError::LengthMismatch {
                field,
                stage,
                expected: n,
                found: col.len(),
            });
        }
        for (index, &value) in col.iter().enumerate() {
            if !value.is_finite() {
                return Err(DataError::NonFiniteValue { field, stage, index, value });
            }
        }
    }
    Ok(())
}

fn check_code_field(
    field: &'static str, cols: &[Array1<usize>], horizon: usize, n: usize,
) -> DataResult<()> {
    if cols.len() != horizon {
        return Err(DataError::HorizonMismatch { field, expected: horizon, found: cols.len() });
    }
    for (stage, col) in cols.iter().enumerate() {
        if col.len() != n {
            return Err(DataError::LengthMismatch {
                field,
                stage,
                expected: n,
                found: col.len(),
            });
        }
    }
    Ok(())
}

/// Owned snapshot of one stage, the unit the per-stage estimators consume.
///
/// `num_a` is carried alongside the columns because the estimators enumerate
/// counterfactual actions `0..num_a` when building cross sets.
#[derive(Debug, Clone, PartialEq)]
pub struct StageData {
    pub z: Array1<f64>,
    pub w: Array1<f64>,
    pub x: Option<Array1<f64>>,
    pub a: Array1<usize>,
    pub e: Array1<usize>,
    pub r: Array1<f64>,
    pub num_a: usize,
}

impl StageData {
    /// Snapshot stage `t` of a dataset.
    ///
    /// # Errors
    /// - [`DataError::StageOutOfRange`] when `t >= ds.horizon()`.
    /// - [`DataError::InvalidNumActions`] when `num_a == 0`.
    /// - [`DataError::ActionOutOfRange`] when any logged or evaluation
    ///   action code reaches `num_a`.
    pub fn from_dataset(ds: &dyn PciDataset, t: usize, num_a: usize) -> DataResult<Self> {
        if t >= ds.horizon() {
            return Err(DataError::StageOutOfRange { stage: t, horizon: ds.horizon() });
        }
        if num_a == 0 {
            return Err(DataError::InvalidNumActions { num_a });
        }
        let a = ds.a(t).to_owned();
        let e = ds.e(t).to_owned();
        for (index, &action) in a.iter().chain(e.iter()).enumerate() {
            if action >= num_a {
                return Err(DataError::ActionOutOfRange {
                    stage: t,
                    index: index % a.len(),
                    action,
                    num_a,
                });
            }
        }
        Ok(Self {
            z: ds.z(t).to_owned(),
            w: ds.w(t).to_owned(),
            x: ds.x(t).map(|x| x.to_owned()),
            a,
            e,
            r: ds.r(t).to_owned(),
            num_a,
        })
    }

    /// Number of trajectories in the snapshot.
    pub fn n(&self) -> usize {
        self.a.len()
    }

    /// Indicator vector `1{a_i == e_i}` as floats.
    pub fn eval_match(&self) -> Array1<f64> {
        Array1::from_iter(
            self.a.iter().zip(self.e.iter()).map(|(&a, &e)| if a == e { 1.0 } else { 0.0 }),
        )
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
    // - Fail-fast validation in `TrajectoryBatch::new` (ragged stages,
    //   non-finite floats).
    // - Stage snapshotting, action range checks, and the eval-match
    //   indicator in `StageData`.
    // -------------------------------------------------------------------------

    fn two_stage_batch() -> TrajectoryBatch {
        TrajectoryBatch::new(
            vec![array![1.0, 2.0, 1.0], array![2.0, 2.0, 1.0]],
            vec![array![0.0, 1.0, 0.0], array![1.0, 0.0, 1.0]],
            None,
            vec![array![0usize, 1, 0], array![1usize, 0, 1]],
            vec![array![0usize, 0, 0], array![1usize, 1, 1]],
            vec![array![1.0, 0.0, 1.0], array![0.5, 0.5, 0.0]],
        )
        .expect("batch should validate")
    }

    #[test]
    // Purpose
    // -------
    // Verify that a well-formed two-stage batch validates and reports its
    // dimensions.
    //
    // Given
    // -----
    // - Three trajectories over two stages, no context.
    //
    // Expect
    // ------
    // - n = 3, horizon = 2, x(t) = None.
    fn trajectory_batch_accepts_well_formed_input() {
        // Act
        let batch = two_stage_batch();

        // Assert
        assert_eq!(batch.n(), 3);
        assert_eq!(batch.horizon(), 2);
        assert!(batch.x(0).is_none());
    }

    #[test]
    // Purpose
    // -------
    // Ensure ragged stage columns are rejected with the offending field
    // and stage.
    //
    // Given
    // -----
    // - A `w` column of length 2 where stage length is 3.
    //
    // Expect
    // ------
    // - `Err(DataError::LengthMismatch { field: "w", stage: 0, .. })`.
    fn trajectory_batch_rejects_ragged_columns() {
        // Act
        let res = TrajectoryBatch::new(
            vec![array![1.0, 2.0, 1.0]],
            vec![array![0.0, 1.0]],
            None,
            vec![array![0usize, 1, 0]],
            vec![array![0usize, 0, 0]],
            vec![array![1.0, 0.0, 1.0]],
        );

        // Assert
        assert!(matches!(
            res,
            Err(DataError::LengthMismatch { field: "w", stage: 0, expected: 3, found: 2 })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Ensure non-finite rewards are caught at construction.
    //
    // Given
    // -----
    // - A reward column containing NaN.
    //
    // Expect
    // ------
    // - `Err(DataError::NonFiniteValue { field: "r", .. })`.
    fn trajectory_batch_rejects_non_finite_rewards() {
        // Act
        let res = TrajectoryBatch::new(
            vec![array![1.0, 2.0]],
            vec![array![0.0, 1.0]],
            None,
            vec![array![0usize, 1]],
            vec![array![0usize, 0]],
            vec![array![1.0, f64::NAN]],
        );

        // Assert
        assert!(matches!(res, Err(DataError::NonFiniteValue { field: "r", .. })));
    }

    #[test]
    // Purpose
    // -------
    // Verify stage snapshots carry the right columns and that the
    // eval-match indicator marks agreement between `a` and `e`.
    //
    // Given
    // -----
    // - The two-stage batch; stage 0 has a = [0,1,0], e = [0,0,0].
    //
    // Expect
    // ------
    // - eval_match = [1, 0, 1] and the stage's z column round-trips.
    fn stage_data_snapshot_and_eval_match() {
        // Arrange
        let batch = two_stage_batch();

        // Act
        let stage = StageData::from_dataset(&batch, 0, 2).expect("stage should validate");

        // Assert
        assert_eq!(stage.z, array![1.0, 2.0, 1.0]);
        assert_eq!(stage.eval_match(), array![1.0, 0.0, 1.0]);
    }

    #[test]
    // Purpose
    // -------
    // Ensure out-of-range stage indices and undersized action spaces are
    // rejected by `StageData::from_dataset`.
    //
    // Given
    // -----
    // - The two-stage batch, queried at stage 5 and with num_a = 1 while
    //   action code 1 is present.
    //
    // Expect
    // ------
    // - `StageOutOfRange` and `ActionOutOfRange` respectively.
    fn stage_data_validates_stage_and_actions() {
        // Arrange
        let batch = two_stage_batch();

        // Act + Assert
        assert!(matches!(
            StageData::from_dataset(&batch, 5, 2),
            Err(DataError::StageOutOfRange { stage: 5, horizon: 2 })
        ));
        assert!(matches!(
            StageData::from_dataset(&batch, 0, 1),
            Err(DataError::ActionOutOfRange { .. })
        ));
    }
}
