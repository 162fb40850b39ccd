// whiten.rs

use crate::error::{PipelineError, Result};
use std::fmt;

/// The three preprocessing switches as given on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizationFlags {
    pub mean_center: bool,
    pub hwe_normalize: bool,
    pub normalize_after_whiten: bool,
}

/// Preprocessing configuration resolved from [`NormalizationFlags`].
///
/// Only two flag combinations describe a meaningful whitening pipeline; every
/// other combination resolves to `Unsupported` and must stop the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WhitenConfig {
    /// Flags matched neither supported configuration.
    Unsupported,
    /// Mean-center, whiten, then normalize: `(true, false, true)`.
    Config1,
    /// HWE-normalize, then whiten without centering: `(false, true, false)`.
    Config2,
}

impl WhitenConfig {
    /// Number used in output folder names, `None` for `Unsupported`.
    pub fn number(self) -> Option<u8> {
        match self {
            WhitenConfig::Unsupported => None,
            WhitenConfig::Config1 => Some(1),
            WhitenConfig::Config2 => Some(2),
        }
    }

    pub fn is_supported(self) -> bool {
        self.number().is_some()
    }

    /// Turns `Unsupported` into an error carrying the offending flags.
    pub fn require_supported(self, flags: NormalizationFlags) -> Result<Self> {
        if self.is_supported() {
            Ok(self)
        } else {
            Err(PipelineError::UnsupportedConfiguration {
                mean_center: flags.mean_center,
                hwe_normalize: flags.hwe_normalize,
                normalize_after_whiten: flags.normalize_after_whiten,
            })
        }
    }
}

impl fmt::Display for WhitenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(n) => write!(f, "0{}", n),
            None => write!(f, "unsupported"),
        }
    }
}

pub fn resolve(mean_center: bool, hwe_normalize: bool, normalize_after_whiten: bool) -> WhitenConfig {
    match (mean_center, hwe_normalize, normalize_after_whiten) {
        (true, false, true) => WhitenConfig::Config1,
        (false, true, false) => WhitenConfig::Config2,
        _ => WhitenConfig::Unsupported,
    }
}

impl NormalizationFlags {
    pub fn resolve(self) -> WhitenConfig {
        resolve(self.mean_center, self.hwe_normalize, self.normalize_after_whiten)
    }
}
