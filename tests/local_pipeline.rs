use bed_reader::WriteOptions;
use genomic_pca_sm::config::{DeploymentConfig, RunDefaults, RunParameters};
use genomic_pca_sm::engine::Table;
use genomic_pca_sm::local::{table, LocalEngine};
use genomic_pca_sm::{pipeline, EngineSession, NormalizationFlags, PipelineError, WhitenConfig};
use ndarray::Array2;
use std::path::Path;
use tempfile::tempdir;

const N_SAMPLES: usize = 24;
const N_VARIANTS: usize = 40;

fn deployment(root: &Path) -> DeploymentConfig {
    DeploymentConfig {
        storage_root: root.join("store"),
        scratch_dir: root.join("scratch"),
        num_threads: 2,
        n_parts_scores: 3,
        n_parts_loadings: 4,
        defaults: RunDefaults {
            whiten_window_size: 0,
            whiten_block_size: 8,
            block_size: 6,
            partition_size: 12,
            k: 3,
            num_moments: 4,
            compute_loadings: true,
            q_iterations: 2,
            oversampling_param: 4,
            moment_samples: 30,
        },
        ..DeploymentConfig::default()
    }
}

/// Writes a small PLINK trio at the deployment's matrix path.
fn write_matrix(deployment: &DeploymentConfig) {
    let prefix = deployment.matrix_path();
    std::fs::create_dir_all(prefix.parent().unwrap()).unwrap();
    let bed_path = prefix.with_file_name(format!("{}.bed", deployment.matrix_name));

    // samples x variants, with a couple of missing calls
    let mut calls = Array2::from_shape_fn((N_SAMPLES, N_VARIANTS), |(i, j)| {
        let group = (i < N_SAMPLES / 2) as usize;
        ((i * 7 + j * 13 + group * j) % 3) as f64
    });
    calls[[0, 0]] = f64::NAN;
    calls[[5, 17]] = f64::NAN;

    let iids: Vec<String> = (0..N_SAMPLES).map(|i| format!("sample{}", i)).collect();
    let sids: Vec<String> = (0..N_VARIANTS).map(|j| format!("rs{}", j)).collect();
    WriteOptions::builder(&bed_path)
        .iid(&iids)
        .sid(&sids)
        .write(&calls)
        .unwrap();
}

fn run(deployment: &DeploymentConfig, flags: NormalizationFlags) -> genomic_pca_sm::Result<pipeline::RunSummary> {
    let params = RunParameters::from_flags(deployment, flags);
    let session = EngineSession::start(deployment)?;
    let engine = LocalEngine::new(deployment.random_seed).with_scratch_dir(session.scratch_dir());
    session.install(|| pipeline::run(&engine, deployment, &params))
}

const CONFIG1: NormalizationFlags = NormalizationFlags {
    mean_center: true,
    hwe_normalize: false,
    normalize_after_whiten: true,
};

const CONFIG2: NormalizationFlags = NormalizationFlags {
    mean_center: false,
    hwe_normalize: true,
    normalize_after_whiten: false,
};

#[test]
fn config2_run_writes_all_three_artifacts() {
    let tmp = tempdir().unwrap();
    let deployment = deployment(tmp.path());
    write_matrix(&deployment);

    let summary = run(&deployment, CONFIG2).unwrap();
    assert_eq!(summary.config, WhitenConfig::Config2);
    assert_eq!((summary.m_variants, summary.n_samples), (N_VARIANTS as u64, N_SAMPLES as u64));
    assert!(summary.loadings_written);
    assert!(summary
        .paths
        .scores
        .ends_with("pca-sm-whitened-02/full-scores-ws0-k3.ht"));
    for path in summary.paths.iter() {
        assert!(path.join("metadata.json").is_file(), "{} missing", path.display());
    }

    let scores = table::read_table(&summary.paths.scores).unwrap();
    assert_eq!(scores.num_rows(), N_SAMPLES);
    assert_eq!(scores.n_partitions, 3);
    assert_eq!(scores.keys[0], "sample0");
    let globals = scores.globals().unwrap();
    assert_eq!(globals.eigenvalues.len(), 3);
    assert_eq!(globals.spectral_moments.len(), 5);
    assert_eq!(globals.spectral_moments[0], N_SAMPLES as f64);
    assert_eq!(globals.standard_errors[0], None);
    assert_eq!(globals.m_variants, N_VARIANTS as u64);

    let loadings = table::read_table(&summary.paths.loadings).unwrap();
    assert_eq!(loadings.num_rows(), N_VARIANTS);
    assert_eq!(loadings.n_partitions, 4);
    let loadings_globals = loadings.globals().unwrap();
    assert_eq!(loadings_globals.name, summary.paths.loadings.display().to_string());
    assert_eq!(loadings_globals.eigenvalues, globals.eigenvalues);
    assert_eq!(loadings_globals.spectral_moments, globals.spectral_moments);
}

#[test]
fn second_run_refuses_to_overwrite_then_reuses_block_table() {
    let tmp = tempdir().unwrap();
    let mut deployment = deployment(tmp.path());
    write_matrix(&deployment);
    let first = run(&deployment, CONFIG1).unwrap();
    assert!(!first.reused_block_table);

    let err = run(&deployment, CONFIG1).unwrap_err();
    assert!(matches!(err, PipelineError::ArtifactAlreadyExists { ref path } if *path == first.paths.block_table));

    deployment.reuse_block_table = true;
    deployment.overwrite = true;
    let second = run(&deployment, CONFIG1).unwrap();
    assert!(second.reused_block_table);

    let scores = table::read_table(&second.paths.scores).unwrap();
    assert_eq!(scores.num_rows(), N_SAMPLES);
}

#[test]
fn whitened_run_uses_window_size_in_paths() {
    let tmp = tempdir().unwrap();
    let mut deployment = deployment(tmp.path());
    deployment.defaults.whiten_window_size = 5;
    write_matrix(&deployment);

    let summary = run(&deployment, CONFIG1).unwrap();
    assert!(summary
        .paths
        .block_table
        .ends_with("pca-sm-whitened-01/full-block_table-ws5.ht"));
    let scores = table::read_table(&summary.paths.scores).unwrap();
    let eigenvalues = &scores.globals().unwrap().eigenvalues;
    assert!(eigenvalues.windows(2).all(|w| w[0] >= w[1]));
}
