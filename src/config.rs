// config.rs
//
// Everything that parameterizes a run apart from the three normalization
// switches is a per-deployment constant. Nothing here is user facing.

use crate::error::{PipelineError, Result};
use crate::whiten::NormalizationFlags;
use serde::Serialize;
use std::path::PathBuf;

// --- Deployment Constants ---

const STORAGE_ROOT: &str = "ukb-data";
const DATA_VERSION: &str = "genotypes";
const SAMPLE_TAG: &str = "406696-samples";
const MATRIX_NAME: &str = "gt_147604_406696";
const SCRATCH_DIR: &str = "ukb-data/tmp/ukb-full";

const N_PARTS_SCORES: usize = 8;
const N_PARTS_LOADINGS: usize = 8;
const OVERWRITE: bool = false;
const REUSE_BLOCK_TABLE: bool = false;
const RANDOM_SEED: u64 = 0x5EED_0CA;

// Sketch construction
const WHITEN_WINDOW_SIZE: usize = 0;
const WHITEN_BLOCK_SIZE: usize = 64;
const BLOCK_SIZE: usize = 100;
const PARTITION_SIZE: usize = 1000;

// PCA and moments
const K_PCS: usize = 100;
const NUM_MOMENTS: usize = 10;
const COMPUTE_LOADINGS: bool = true;
const Q_ITERATIONS: usize = 10;
const OVERSAMPLING_PARAM: usize = 10;
const MOMENT_SAMPLES: usize = 100;

/// Fixed settings of one deployment: where data lives, how outputs are laid
/// out, and the default values every [`RunParameters`] starts from.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub storage_root: PathBuf,
    pub version: String,
    pub sample_tag: String,
    /// PLINK prefix (without extension) of the input matrix, relative to
    /// `{storage_root}/{version}/{sample_tag}`.
    pub matrix_name: String,
    pub scratch_dir: PathBuf,
    pub n_parts_scores: usize,
    pub n_parts_loadings: usize,
    pub overwrite: bool,
    pub reuse_block_table: bool,
    pub num_threads: usize,
    pub random_seed: u64,
    pub defaults: RunDefaults,
}

/// Values merged with the command-line flags to build [`RunParameters`].
#[derive(Debug, Clone, Copy)]
pub struct RunDefaults {
    pub whiten_window_size: usize,
    pub whiten_block_size: usize,
    pub block_size: usize,
    pub partition_size: usize,
    pub k: usize,
    pub num_moments: usize,
    pub compute_loadings: bool,
    pub q_iterations: usize,
    pub oversampling_param: usize,
    pub moment_samples: usize,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            whiten_window_size: WHITEN_WINDOW_SIZE,
            whiten_block_size: WHITEN_BLOCK_SIZE,
            block_size: BLOCK_SIZE,
            partition_size: PARTITION_SIZE,
            k: K_PCS,
            num_moments: NUM_MOMENTS,
            compute_loadings: COMPUTE_LOADINGS,
            q_iterations: Q_ITERATIONS,
            oversampling_param: OVERSAMPLING_PARAM,
            moment_samples: MOMENT_SAMPLES,
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(STORAGE_ROOT),
            version: DATA_VERSION.to_string(),
            sample_tag: SAMPLE_TAG.to_string(),
            matrix_name: MATRIX_NAME.to_string(),
            scratch_dir: PathBuf::from(SCRATCH_DIR),
            n_parts_scores: N_PARTS_SCORES,
            n_parts_loadings: N_PARTS_LOADINGS,
            overwrite: OVERWRITE,
            reuse_block_table: REUSE_BLOCK_TABLE,
            num_threads: num_cpus::get(),
            random_seed: RANDOM_SEED,
            defaults: RunDefaults::default(),
        }
    }
}

impl DeploymentConfig {
    /// `{storage_root}/{version}/{sample_tag}`, the folder all artifacts of
    /// this deployment live under.
    pub fn dataset_prefix(&self) -> PathBuf {
        self.storage_root.join(&self.version).join(&self.sample_tag)
    }

    pub fn matrix_path(&self) -> PathBuf {
        self.dataset_prefix().join(&self.matrix_name)
    }
}

// --- Run Parameters ---

/// Immutable parameters of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParameters {
    pub mean_center: bool,
    pub hwe_normalize: bool,
    pub normalize_after_whiten: bool,
    /// 0 disables whitening.
    pub whiten_window_size: usize,
    pub whiten_block_size: usize,
    pub block_size: usize,
    pub partition_size: usize,
    pub k: usize,
    pub num_moments: usize,
    pub q_iterations: usize,
    pub oversampling_param: usize,
    pub moment_samples: usize,
    pub compute_loadings: bool,
}

impl RunParameters {
    pub fn from_flags(deployment: &DeploymentConfig, flags: NormalizationFlags) -> Self {
        let d = deployment.defaults;
        Self {
            mean_center: flags.mean_center,
            hwe_normalize: flags.hwe_normalize,
            normalize_after_whiten: flags.normalize_after_whiten,
            whiten_window_size: d.whiten_window_size,
            whiten_block_size: d.whiten_block_size,
            block_size: d.block_size,
            partition_size: d.partition_size,
            k: d.k,
            num_moments: d.num_moments,
            q_iterations: d.q_iterations,
            oversampling_param: d.oversampling_param,
            moment_samples: d.moment_samples,
            compute_loadings: d.compute_loadings,
        }
    }

    pub fn flags(&self) -> NormalizationFlags {
        NormalizationFlags {
            mean_center: self.mean_center,
            hwe_normalize: self.hwe_normalize,
            normalize_after_whiten: self.normalize_after_whiten,
        }
    }

    pub fn whitening_enabled(&self) -> bool {
        self.whiten_window_size != 0
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.k == 0 {
            problems.push("k must be > 0".to_string());
        }
        if self.block_size == 0 {
            problems.push("block_size must be > 0".to_string());
        }
        if self.partition_size == 0 {
            problems.push("partition_size must be > 0".to_string());
        }
        if self.num_moments > 0 && self.moment_samples == 0 {
            problems.push(format!(
                "moment_samples must be > 0 to estimate {} moments",
                self.num_moments
            ));
        }
        if self.whitening_enabled() && self.whiten_block_size == 0 {
            problems.push(format!(
                "whiten_block_size must be > 0 when whiten_window_size is {}",
                self.whiten_window_size
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidParameters(problems.join("; ")))
        }
    }

    pub fn sketch_params(&self) -> SketchParams {
        SketchParams {
            block_size: self.block_size,
            partition_size: self.partition_size,
            mean_center: self.mean_center,
            hwe_normalize: self.hwe_normalize,
            normalize_after_whiten: self.normalize_after_whiten,
            whitening: self.whitening_enabled().then_some(WhiteningParams {
                window_size: self.whiten_window_size,
                block_size: self.whiten_block_size,
            }),
        }
    }

    pub fn pca_params(&self) -> PcaParams {
        PcaParams {
            k: self.k,
            num_moments: self.num_moments,
            compute_loadings: self.compute_loadings,
            q_iterations: self.q_iterations,
            oversampling_param: self.oversampling_param,
            moment_samples: self.moment_samples,
        }
    }
}

// --- Collaborator Parameter Sets ---

/// Arguments of the sketch construction call. The presence of `whitening` is
/// what requests whitening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SketchParams {
    pub block_size: usize,
    pub partition_size: usize,
    pub mean_center: bool,
    pub hwe_normalize: bool,
    pub normalize_after_whiten: bool,
    #[serde(flatten)]
    pub whitening: Option<WhiteningParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WhiteningParams {
    #[serde(rename = "whiten_window_size")]
    pub window_size: usize,
    #[serde(rename = "whiten_block_size")]
    pub block_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcaParams {
    pub k: usize,
    pub num_moments: usize,
    pub compute_loadings: bool,
    pub q_iterations: usize,
    pub oversampling_param: usize,
    pub moment_samples: usize,
}
