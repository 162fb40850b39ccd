// engine.rs
//
// The contract between the pipeline driver and whatever performs the actual
// computation and storage. The driver only ever talks to these traits.

use crate::config::{PcaParams, SketchParams};
use crate::error::Result;
use crate::provenance::Provenance;
use std::path::Path;

/// A loaded genotype matrix keyed by (variant, sample).
pub trait GenotypeMatrix {
    /// `(m_variants, n_samples)` as reported by the loaded data.
    fn count(&self) -> (u64, u64);
}

/// A result table that can carry global metadata and be repartitioned
/// before it is written.
pub trait Table: Sized {
    fn annotate_globals(self, provenance: Provenance) -> Self;
    fn repartition(self, target_partitions: usize) -> Self;
    fn globals(&self) -> Option<&Provenance>;
    fn num_rows(&self) -> usize;
}

/// Everything the PCA/moment call returns.
#[derive(Debug)]
pub struct ResultBundle<T> {
    /// Descending, length k.
    pub eigenvalues: Vec<f64>,
    /// One row per sample.
    pub scores: T,
    /// One row per variant; `None` unless loadings were requested.
    pub loadings: Option<T>,
    /// Estimates of tr((AᵀA)^i) for i = 1..=num_moments.
    pub moments: Vec<f64>,
    /// Parallel to `moments`.
    pub standard_errors: Vec<f64>,
}

pub trait Engine {
    type Matrix: GenotypeMatrix;
    type Sketch;
    type Table: Table;

    fn read_matrix(&self, path: &Path) -> Result<Self::Matrix>;

    fn build_sketch(&self, matrix: &Self::Matrix, params: &SketchParams) -> Result<Self::Sketch>;

    fn artifact_exists(&self, path: &Path) -> bool;

    /// Persists the sketch at `path` and hands it back. Fails with
    /// `ArtifactAlreadyExists` if `path` is occupied and `overwrite` is false.
    fn checkpoint_sketch(&self, sketch: Self::Sketch, path: &Path, overwrite: bool) -> Result<Self::Sketch>;

    fn read_sketch(&self, path: &Path) -> Result<Self::Sketch>;

    fn pca_and_moments(&self, sketch: &Self::Sketch, params: &PcaParams) -> Result<ResultBundle<Self::Table>>;

    /// Fails with `ArtifactAlreadyExists` if `path` is occupied and
    /// `overwrite` is false.
    fn write_table(&self, table: &Self::Table, path: &Path, overwrite: bool) -> Result<()>;
}
