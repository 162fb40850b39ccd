// lib.rs
//
// PCA and spectral-moment estimation over a persisted genotype matrix, with
// optional LD whitening. The driver in `pipeline` is engine-agnostic; `local`
// is the in-process engine the binary runs with.

pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod paths;
pub mod pipeline;
pub mod provenance;
pub mod session;
pub mod whiten;

pub use config::{DeploymentConfig, PcaParams, RunParameters, SketchParams};
pub use error::{PipelineError, Result};
pub use paths::ArtifactPaths;
pub use pipeline::{run, RunSummary};
pub use provenance::Provenance;
pub use session::EngineSession;
pub use whiten::{NormalizationFlags, WhitenConfig};
