// error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error from an engine collaborator, kept intact as the error source.
pub type CollaboratorSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every way a run can fail. None of these are retried.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "Unsupported whitening configuration: mean_center={mean_center}, hwe_normalize={hwe_normalize}, normalize_after_whiten={normalize_after_whiten}. Supported: (true, false, true) or (false, true, false)."
    )]
    UnsupportedConfiguration {
        mean_center: bool,
        hwe_normalize: bool,
        normalize_after_whiten: bool,
    },

    #[error("Artifact already exists at {path} and neither overwrite nor re-use was requested.")]
    ArtifactAlreadyExists { path: PathBuf },

    #[error("{operation} failed: {source}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: CollaboratorSource,
    },

    #[error("Invalid run parameters: {0}")]
    InvalidParameters(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to acquire engine session: {0}")]
    Session(String),
}

impl PipelineError {
    pub fn collaborator<E>(operation: &'static str, source: E) -> Self
    where
        E: Into<CollaboratorSource>,
    {
        PipelineError::Collaborator {
            operation,
            source: source.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for PipelineError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        PipelineError::Session(format!("worker pool: {}", e))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
