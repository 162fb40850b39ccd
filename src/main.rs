// main.rs

// --- External Crate Imports ---
use anyhow::{Context, Error, Result};
use clap::Parser;
use env_logger::Env;
use genomic_pca_sm::config::{DeploymentConfig, RunParameters};
use genomic_pca_sm::local::LocalEngine;
use genomic_pca_sm::{pipeline, EngineSession, NormalizationFlags};
use log::{error, info};
use std::time::Instant;

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting genomic_pca_sm with args: {:?}", cli_args);

    match run(&cli_args) {
        Ok(()) => {
            info!(
                "genomic_pca_sm finished successfully in {:.2?}.",
                total_time_start.elapsed()
            );
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

fn run(cli_args: &cli::CliArgs) -> Result<()> {
    let flags = cli_args.flags();

    // Unsupported flag combinations stop here, before the session touches disk.
    let config = flags.resolve().require_supported(flags)?;

    let deployment = DeploymentConfig::default();
    let params = RunParameters::from_flags(&deployment, flags);
    println!("Whitening configuration {}", config);
    println!("{:#?}", params);

    let session = EngineSession::start(&deployment)?;
    let engine = LocalEngine::new(deployment.random_seed).with_scratch_dir(session.scratch_dir());
    let summary = session
        .install(|| pipeline::run(&engine, &deployment, &params))
        .context("PCA/SM run failed")?;

    info!(
        "Scores written to {} ({} samples).",
        summary.paths.scores.display(),
        summary.n_samples
    );
    if summary.loadings_written {
        info!(
            "Loadings written to {} ({} variants).",
            summary.paths.loadings.display(),
            summary.m_variants
        );
    }
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use super::NormalizationFlags;
    use clap::Parser;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "PCA and spectral moments of a whitened genotype matrix.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        /// Subtract each variant's mean before whitening.
        #[arg(long = "mean_center")]
        pub(crate) mean_center: bool,

        /// Scale each variant by its Hardy-Weinberg standard deviation.
        #[arg(long = "hwe_normalize")]
        pub(crate) hwe_normalize: bool,

        /// Rescale each whitened variant to unit mean square.
        #[arg(long = "normalize_after_whiten")]
        pub(crate) normalize_after_whiten: bool,
    }

    impl CliArgs {
        pub(crate) fn flags(&self) -> NormalizationFlags {
            NormalizationFlags {
                mean_center: self.mean_center,
                hwe_normalize: self.hwe_normalize,
                normalize_after_whiten: self.normalize_after_whiten,
            }
        }
    }

}
