// pipeline.rs

use crate::config::{DeploymentConfig, RunParameters};
use crate::engine::{Engine, GenotypeMatrix, ResultBundle, Table};
use crate::error::{PipelineError, Result};
use crate::paths::{self, ArtifactPaths};
use crate::provenance;
use crate::whiten::WhitenConfig;
use log::{debug, info, warn};
use std::time::Instant;

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub config: WhitenConfig,
    pub paths: ArtifactPaths,
    pub m_variants: u64,
    pub n_samples: u64,
    pub reused_block_table: bool,
    pub loadings_written: bool,
}

/// Runs PCA and spectral moment estimation end to end.
///
/// Steps are strictly sequential. The configuration and parameters are
/// checked before the engine is touched; any later failure aborts the run and
/// may leave a partial artifact set behind, which callers must not treat as
/// complete.
pub fn run<E: Engine>(engine: &E, deployment: &DeploymentConfig, params: &RunParameters) -> Result<RunSummary> {
    let run_start = Instant::now();

    // --- 1. Resolve configuration and validate everything before any I/O ---
    let flags = params.flags();
    let config = flags.resolve().require_supported(flags)?;
    info!("Whitening configuration {}.", config);

    params.validate()?;
    if deployment.n_parts_scores == 0 || deployment.n_parts_loadings == 0 {
        return Err(PipelineError::InvalidParameters(format!(
            "output partition counts must be > 0 (scores: {}, loadings: {})",
            deployment.n_parts_scores, deployment.n_parts_loadings
        )));
    }

    let artifact_paths = paths::derive(
        &deployment.dataset_prefix(),
        config,
        params.whiten_window_size,
        params.k,
    )?;
    let sketch_params = params.sketch_params();
    let pca_params = params.pca_params();
    info!("Args passed to sketch construction: {:?}", sketch_params);
    info!("Args passed to PCA and moments: {:?}", pca_params);
    debug!("Artifact paths: {:?}", artifact_paths);

    // An occupied block table is refused before any sketching work; the
    // checkpoint still checks again when it writes.
    let block_table_exists = engine.artifact_exists(&artifact_paths.block_table);
    if block_table_exists && !deployment.reuse_block_table && !deployment.overwrite {
        return Err(PipelineError::ArtifactAlreadyExists {
            path: artifact_paths.block_table.clone(),
        });
    }

    // --- 2. Load the matrix; its own counts are authoritative ---
    let matrix_path = deployment.matrix_path();
    info!(
        "Running PCA/SM on {}, {}...",
        matrix_path.display(),
        deployment.sample_tag
    );
    let matrix = engine.read_matrix(&matrix_path)?;
    let (m_variants, n_samples) = matrix.count();
    info!("Loaded matrix: {} variants x {} samples.", m_variants, n_samples);

    // --- 3 & 4. Sketch, checkpointed before PCA ---
    let reused_block_table = deployment.reuse_block_table && block_table_exists;
    let sketch = if reused_block_table {
        warn!(
            "Re-using existing block table at {}; sketch construction skipped.",
            artifact_paths.block_table.display()
        );
        engine.read_sketch(&artifact_paths.block_table)?
    } else {
        let sketch = engine.build_sketch(&matrix, &sketch_params)?;
        info!("Checkpointing block table to {}.", artifact_paths.block_table.display());
        engine.checkpoint_sketch(sketch, &artifact_paths.block_table, deployment.overwrite)?
    };
    drop(matrix);

    // --- 5. PCA and moments ---
    let bundle = engine.pca_and_moments(&sketch, &pca_params)?;
    check_bundle(&bundle, params)?;
    info!(
        "PCA/SM complete: {} eigenvalues, {} moments, loadings {}.",
        bundle.eigenvalues.len(),
        bundle.moments.len(),
        if bundle.loadings.is_some() { "computed" } else { "not computed" }
    );
    let ResultBundle {
        eigenvalues,
        scores,
        loadings,
        moments,
        standard_errors,
    } = bundle;

    // --- 6. Provenance, shared by both tables ---
    let scores_globals = provenance::annotate(
        &artifact_paths.scores,
        &eigenvalues,
        &moments,
        &standard_errors,
        m_variants,
        n_samples,
    );
    debug!("Spectral moments: {:?}", scores_globals.spectral_moments);

    // --- 7. Scores ---
    let loadings_globals = scores_globals.renamed(&artifact_paths.loadings);
    let scores = scores
        .annotate_globals(scores_globals)
        .repartition(deployment.n_parts_scores);
    info!(
        "Writing scores ({} rows) to {}.",
        scores.num_rows(),
        artifact_paths.scores.display()
    );
    engine.write_table(&scores, &artifact_paths.scores, deployment.overwrite)?;

    // --- 8. Loadings ---
    let loadings_written = match loadings {
        Some(loadings) => {
            let loadings = loadings
                .annotate_globals(loadings_globals)
                .repartition(deployment.n_parts_loadings);
            info!(
                "Writing loadings ({} rows) to {}.",
                loadings.num_rows(),
                artifact_paths.loadings.display()
            );
            engine.write_table(&loadings, &artifact_paths.loadings, deployment.overwrite)?;
            true
        }
        None => {
            if params.compute_loadings {
                warn!("Loadings were requested but the engine returned none; skipping loadings output.");
            }
            false
        }
    };

    info!("Run finished in {:.2?}.", run_start.elapsed());
    Ok(RunSummary {
        config,
        paths: artifact_paths,
        m_variants,
        n_samples,
        reused_block_table,
        loadings_written,
    })
}

fn check_bundle<T>(bundle: &ResultBundle<T>, params: &RunParameters) -> Result<()> {
    const OP: &str = "PCA and moment estimation";
    if bundle.moments.len() != bundle.standard_errors.len() {
        return Err(PipelineError::collaborator(
            OP,
            format!(
                "returned {} moments but {} standard errors",
                bundle.moments.len(),
                bundle.standard_errors.len()
            ),
        ));
    }
    if bundle.moments.len() != params.num_moments {
        return Err(PipelineError::collaborator(
            OP,
            format!(
                "returned {} moments, expected {}",
                bundle.moments.len(),
                params.num_moments
            ),
        ));
    }
    if bundle.eigenvalues.len() > params.k {
        return Err(PipelineError::collaborator(
            OP,
            format!(
                "returned {} eigenvalues for k={}",
                bundle.eigenvalues.len(),
                params.k
            ),
        ));
    }
    Ok(())
}
