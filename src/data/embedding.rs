//! data::embedding — feature maps from raw columns to critic/kernel inputs.
//!
//! Purpose
//! -------
//! The estimators never consume raw proxy values directly; every critic
//! forward pass and every Gram matrix is computed over an embedded design
//! matrix. [`EmbeddingSet`] is the seam where problem-specific feature maps
//! plug in: the caller supplies one per experiment setup and the estimators
//! concatenate the per-field embeddings as needed.
//!
//! Key behaviors
//! -------------
//! - [`EmbeddingSet`]: one embedding per field (`z`, `w`, `x`, `a`), each
//!   mapping a length-`n` column to an `n × d_field` matrix.
//! - [`embed_zxa`] / [`embed_wxa`]: the canonical column-wise concatenations
//!   used for Q-side and H-side inputs; `x` is skipped when absent.
//! - [`OneHotEmbedding`]: indicator features for discrete problems.
//! - [`IdentityEmbedding`]: raw scalar passthrough for continuous proxies,
//!   with one-hot actions.
//!
//! Conventions
//! -----------
//! - Proxy and context columns arrive as `f64`; discrete setups encode
//!   levels as integer-valued floats and `OneHotEmbedding` rounds them to
//!   indices. Level codes are assumed to lie in `0..width` once the data
//!   layer has validated the batch.
use ndarray::{Array2, ArrayView1, Axis, s};

/// Per-field feature maps for one experiment setup.
///
/// Each method maps a length-`n` column to an `n × d_field` design matrix.
/// The field dimensions are fixed per instance so concatenations line up
/// across stages.
pub trait EmbeddingSet {
    /// Embed the future-facing proxy column.
    fn embed_z(&self, z: &ArrayView1<f64>) -> Array2<f64>;
    /// Embed the past-facing proxy column.
    fn embed_w(&self, w: &ArrayView1<f64>) -> Array2<f64>;
    /// Embed the context column.
    fn embed_x(&self, x: &ArrayView1<f64>) -> Array2<f64>;
    /// Embed a column of action codes.
    fn embed_a(&self, a: &ArrayView1<usize>) -> Array2<f64>;
}

/// One-hot indicator matrix for a column of codes.
///
/// Row `i` has a single 1.0 at column `codes[i]`. Codes at or beyond
/// `width` leave an all-zero row; the data layer rejects those upstream.
pub fn one_hot(codes: &ArrayView1<usize>, width: usize) -> Array2<f64> {
    let mut out = Array2::zeros((codes.len(), width));
    for (i, &c) in codes.iter().enumerate() {
        if c < width {
            out[(i, c)] = 1.0;
        }
    }
    out
}

/// Concatenate design matrices column-wise.
///
/// All parts must share the same row count; a mismatch is a caller bug and
/// panics. An empty slice yields a 0 × 0 matrix.
pub fn hstack(parts: &[Array2<f64>]) -> Array2<f64> {
    let rows = parts.first().map(|p| p.nrows()).unwrap_or(0);
    debug_assert!(
        parts.iter().all(|p| p.nrows() == rows),
        "design matrix blocks disagree on row count"
    );
    let cols = parts.iter().map(|p| p.ncols()).sum();
    let mut out = Array2::zeros((rows, cols));
    let mut offset = 0;
    for p in parts {
        out.slice_mut(s![.., offset..offset + p.ncols()]).assign(p);
        offset += p.ncols();
    }
    out
}

/// Embed `(z, x, a)` rows: the Q-side input design matrix.
pub fn embed_zxa(
    emb: &dyn EmbeddingSet, z: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>,
    a: &ArrayView1<usize>,
) -> Array2<f64> {
    let mut parts = vec![emb.embed_z(z)];
    if let Some(x) = x {
        parts.push(emb.embed_x(x));
    }
    parts.push(emb.embed_a(a));
    hstack(&parts)
}

/// Embed `(w, x, a)` rows: the H-side input design matrix.
pub fn embed_wxa(
    emb: &dyn EmbeddingSet, w: &ArrayView1<f64>, x: Option<&ArrayView1<f64>>,
    a: &ArrayView1<usize>,
) -> Array2<f64> {
    let mut parts = vec![emb.embed_w(w)];
    if let Some(x) = x {
        parts.push(emb.embed_x(x));
    }
    parts.push(emb.embed_a(a));
    hstack(&parts)
}

/// Indicator features for fully discrete setups.
///
/// Proxy and context levels are integer-valued floats; each field embeds to
/// its own one-hot block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneHotEmbedding {
    pub num_z: usize,
    pub num_w: usize,
    pub num_x: usize,
    pub num_a: usize,
}

impl OneHotEmbedding {
    /// Context-free constructor; `num_x` stays 0 and `embed_x` produces an
    /// empty block.
    pub fn new(num_z: usize, num_w: usize, num_a: usize) -> Self {
        Self { num_z, num_w, num_x: 0, num_a }
    }
}

fn codes_from_floats(vals: &ArrayView1<f64>) -> Vec<usize> {
    vals.iter().map(|&v| v.round().max(0.0) as usize).collect()
}

impl EmbeddingSet for OneHotEmbedding {
    fn embed_z(&self, z: &ArrayView1<f64>) -> Array2<f64> {
        let codes = codes_from_floats(z);
        one_hot(&ArrayView1::from(&codes), self.num_z)
    }

    fn embed_w(&self, w: &ArrayView1<f64>) -> Array2<f64> {
        let codes = codes_from_floats(w);
        one_hot(&ArrayView1::from(&codes), self.num_w)
    }

    fn embed_x(&self, x: &ArrayView1<f64>) -> Array2<f64> {
        let codes = codes_from_floats(x);
        one_hot(&ArrayView1::from(&codes), self.num_x)
    }

    fn embed_a(&self, a: &ArrayView1<usize>) -> Array2<f64> {
        one_hot(a, self.num_a)
    }
}

/// Raw passthrough for continuous scalar proxies, with one-hot actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityEmbedding {
    pub num_a: usize,
}

fn as_column(vals: &ArrayView1<f64>) -> Array2<f64> {
    vals.to_owned().insert_axis(Axis(1))
}

impl EmbeddingSet for IdentityEmbedding {
    fn embed_z(&self, z: &ArrayView1<f64>) -> Array2<f64> {
        as_column(z)
    }

    fn embed_w(&self, w: &ArrayView1<f64>) -> Array2<f64> {
        as_column(w)
    }

    fn embed_x(&self, x: &ArrayView1<f64>) -> Array2<f64> {
        as_column(x)
    }

    fn embed_a(&self, a: &ArrayView1<usize>) -> Array2<f64> {
        one_hot(a, self.num_a)
    }
}
