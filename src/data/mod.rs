//! data — validated trajectory containers, accessor traits, and embeddings.
//!
//! Purpose
//! -------
//! Own everything the estimators assume about their inputs: the
//! [`PciDataset`] accessor contract, the fail-fast [`TrajectoryBatch`]
//! container, per-stage [`StageData`] snapshots, and the [`EmbeddingSet`]
//! feature-map seam that turns raw columns into critic and kernel inputs.
//!
//! Conventions
//! -----------
//! - Construction validates once; downstream code assumes finite floats and
//!   in-range action codes.
//! - Errors surface as [`errors::DataError`] with the offending field,
//!   stage, and index.

pub mod dataset;
pub mod embedding;
pub mod errors;

pub use self::dataset::{PciDataset, StageData, TrajectoryBatch};
pub use self::embedding::{
    EmbeddingSet, IdentityEmbedding, OneHotEmbedding, embed_wxa, embed_zxa, hstack, one_hot,
};
pub use self::errors::{DataError, DataResult};
