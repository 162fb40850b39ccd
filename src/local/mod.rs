// local/mod.rs
//
// In-process engine: PLINK input, a dense block sketch in memory, randomized
// PCA, and directory-per-artifact storage on the local filesystem.

pub mod plink;
pub mod rsvd;
pub mod sketch;
pub mod table;

use crate::config::{PcaParams, SketchParams};
use crate::engine::{Engine, ResultBundle};
use crate::error::Result;
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub use plink::PlinkMatrix;
pub use sketch::{BlockSketch, SketchBlock, VariantBlockSource};
pub use table::LocalTable;

#[derive(Debug, Clone)]
pub struct LocalEngine {
    seed: u64,
    staging_root: Option<PathBuf>,
}

impl LocalEngine {
    /// `seed` drives the PCA test matrix; the moment probes use `seed + 1`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            staging_root: None,
        }
    }

    /// Assemble artifacts under `dir` before moving them into place. `dir`
    /// must share a filesystem with the artifact destinations.
    pub fn with_scratch_dir(mut self, dir: &Path) -> Self {
        self.staging_root = Some(dir.to_path_buf());
        self
    }
}

impl Engine for LocalEngine {
    type Matrix = PlinkMatrix;
    type Sketch = BlockSketch;
    type Table = LocalTable;

    fn read_matrix(&self, path: &Path) -> Result<PlinkMatrix> {
        PlinkMatrix::open(path)
    }

    fn build_sketch(&self, matrix: &PlinkMatrix, params: &SketchParams) -> Result<BlockSketch> {
        sketch::build_block_sketch(matrix, params)
    }

    fn artifact_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn checkpoint_sketch(&self, sketch: BlockSketch, path: &Path, overwrite: bool) -> Result<BlockSketch> {
        table::write_sketch(&sketch, path, overwrite, self.staging_root.as_deref())?;
        Ok(sketch)
    }

    fn read_sketch(&self, path: &Path) -> Result<BlockSketch> {
        table::read_sketch(path)
    }

    fn pca_and_moments(&self, sketch: &BlockSketch, params: &PcaParams) -> Result<ResultBundle<LocalTable>> {
        info!(
            "PCA/SM parameters: {}",
            serde_json::to_string(params).unwrap_or_else(|_| format!("{:?}", params))
        );
        let start = Instant::now();
        let pca = rsvd::randomized_pca(
            sketch,
            params.k,
            params.oversampling_param,
            params.q_iterations,
            params.compute_loadings,
            self.seed,
        )?;
        let moments = rsvd::spectral_moments(
            sketch,
            params.num_moments,
            params.moment_samples,
            self.seed.wrapping_add(1),
        )?;
        info!("PCA/SM finished in {:.2?}.", start.elapsed());

        let scores = LocalTable::new("s", "scores", sketch.sample_ids.clone(), pca.scores);
        let loadings = pca
            .loadings
            .map(|values| LocalTable::new("variant", "loadings", sketch.variant_ids.clone(), values));

        Ok(ResultBundle {
            eigenvalues: pca.eigenvalues,
            scores,
            loadings,
            moments: moments.moments,
            standard_errors: moments.standard_errors,
        })
    }

    fn write_table(&self, table: &LocalTable, path: &Path, overwrite: bool) -> Result<()> {
        table::write_table(table, path, overwrite, self.staging_root.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::sketch::tests::{params, DenseCalls};
    use super::*;
    use crate::engine::Table;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn pca_params(compute_loadings: bool) -> PcaParams {
        PcaParams {
            k: 3,
            num_moments: 4,
            compute_loadings,
            q_iterations: 2,
            oversampling_param: 3,
            moment_samples: 20,
        }
    }

    fn sketch() -> BlockSketch {
        let calls = Array2::from_shape_fn((30, 12), |(i, j)| ((i * 5 + j * 11 + i * j) % 3) as f64);
        sketch::build_block_sketch(&DenseCalls::new(calls), &params(true, false, true)).unwrap()
    }

    #[test]
    fn test_bundle_shapes_and_keys() {
        let engine = LocalEngine::new(17);
        let sketch = sketch();
        let bundle = engine.pca_and_moments(&sketch, &pca_params(true)).unwrap();
        assert_eq!(bundle.eigenvalues.len(), 3);
        assert!(bundle.eigenvalues.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(bundle.moments.len(), 4);
        assert_eq!(bundle.standard_errors.len(), 4);
        assert_eq!(bundle.scores.num_rows(), 12);
        assert_eq!(bundle.scores.keys[0], "S0");
        assert_eq!(bundle.scores.key_field, "s");
        let loadings = bundle.loadings.unwrap();
        assert_eq!(loadings.num_rows(), 30);
        assert_eq!(loadings.key_field, "variant");
    }

    #[test]
    fn test_no_loadings_unless_requested() {
        let engine = LocalEngine::new(17);
        let bundle = engine.pca_and_moments(&sketch(), &pca_params(false)).unwrap();
        assert!(bundle.loadings.is_none());
    }

    #[test]
    fn test_checkpoint_then_read_back() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("full-block_table-ws0.ht");
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let engine = LocalEngine::new(1).with_scratch_dir(&scratch);
        assert!(!engine.artifact_exists(&path));
        let sketch = engine.checkpoint_sketch(sketch(), &path, false).unwrap();
        assert!(engine.artifact_exists(&path));
        let back = engine.read_sketch(&path).unwrap();
        assert_eq!(back.blocks.len(), sketch.blocks.len());
        assert_eq!(back.sample_ids, sketch.sample_ids);
    }
}
