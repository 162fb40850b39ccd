// session.rs

use crate::config::DeploymentConfig;
use crate::error::{PipelineError, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Execution resources held for the duration of one run: a dedicated worker
/// pool and a scratch directory. Released when dropped, on every exit path.
pub struct EngineSession {
    pool: rayon::ThreadPool,
    scratch_dir: PathBuf,
    started: Instant,
}

impl EngineSession {
    pub fn start(deployment: &DeploymentConfig) -> Result<Self> {
        let num_threads = deployment.num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("pca-sm-worker-{}", i))
            .build()?;

        std::fs::create_dir_all(&deployment.scratch_dir).map_err(|e| {
            PipelineError::Session(format!(
                "cannot create scratch directory {}: {}",
                deployment.scratch_dir.display(),
                e
            ))
        })?;

        info!(
            "Engine session started: {} worker threads, scratch dir {}.",
            num_threads,
            deployment.scratch_dir.display()
        );
        Ok(Self {
            pool,
            scratch_dir: deployment.scratch_dir.clone(),
            started: Instant::now(),
        })
    }

    /// Runs `op` with this session's pool as the rayon pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        debug!("Releasing worker pool ({} threads).", self.pool.current_num_threads());
        info!("Engine session stopped after {:.2?}.", self.started.elapsed());
    }
}
