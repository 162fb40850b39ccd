// paths.rs

use crate::error::{PipelineError, Result};
use crate::whiten::WhitenConfig;
use std::path::{Path, PathBuf};

/// Storage locations of the three artifacts a run produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactPaths {
    pub block_table: PathBuf,
    pub scores: PathBuf,
    pub loadings: PathBuf,
}

/// Derives artifact locations under `dataset_prefix` (which already ends in
/// the sample tag). Pure string construction; storage is never touched.
pub fn derive(
    dataset_prefix: &Path,
    config: WhitenConfig,
    whiten_window_size: usize,
    k: usize,
) -> Result<ArtifactPaths> {
    let config_number = config.number().ok_or_else(|| {
        PipelineError::InvalidParameters(
            "cannot derive artifact paths for an unsupported whitening configuration".to_string(),
        )
    })?;

    let config_folder = dataset_prefix.join(format!("pca-sm-whitened-0{}", config_number));
    let ws = whiten_window_size;
    Ok(ArtifactPaths {
        block_table: config_folder.join(format!("full-block_table-ws{}.ht", ws)),
        scores: config_folder.join(format!("full-scores-ws{}-k{}.ht", ws, k)),
        loadings: config_folder.join(format!("full-loadings-ws{}-k{}.ht", ws, k)),
    })
}

impl ArtifactPaths {
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [self.block_table.as_path(), self.scores.as_path(), self.loadings.as_path()].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn prefix() -> PathBuf {
        PathBuf::from("ukb-data/genotypes/406696-samples")
    }

    #[test]
    fn test_layout_for_default_run() {
        let paths = derive(&prefix(), WhitenConfig::Config1, 0, 100).unwrap();
        assert_eq!(
            paths.block_table,
            PathBuf::from("ukb-data/genotypes/406696-samples/pca-sm-whitened-01/full-block_table-ws0.ht")
        );
        assert_eq!(
            paths.scores,
            PathBuf::from("ukb-data/genotypes/406696-samples/pca-sm-whitened-01/full-scores-ws0-k100.ht")
        );
        assert_eq!(
            paths.loadings,
            PathBuf::from("ukb-data/genotypes/406696-samples/pca-sm-whitened-01/full-loadings-ws0-k100.ht")
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive(&prefix(), WhitenConfig::Config2, 200, 20).unwrap();
        let b = derive(&prefix(), WhitenConfig::Config2, 200, 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_input_change_changes_some_path() {
        let base = derive(&prefix(), WhitenConfig::Config1, 0, 100).unwrap();
        let variants = [
            derive(&prefix(), WhitenConfig::Config2, 0, 100).unwrap(),
            derive(&prefix(), WhitenConfig::Config1, 200, 100).unwrap(),
            derive(&prefix(), WhitenConfig::Config1, 0, 10).unwrap(),
            derive(Path::new("ukb-data/genotypes/337111-samples"), WhitenConfig::Config1, 0, 100).unwrap(),
        ];
        for other in &variants {
            assert_ne!(&base, other);
        }
    }

    #[test]
    fn test_distinct_tuples_never_share_a_location() {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut block_tables: HashSet<PathBuf> = HashSet::new();
        for config in [WhitenConfig::Config1, WhitenConfig::Config2] {
            for ws in [0, 1, 10, 100, 1000] {
                // The block table does not depend on k.
                let first = derive(&prefix(), config, ws, 1).unwrap();
                assert!(block_tables.insert(first.block_table.clone()));
                for k in [1, 10, 11, 100, 110] {
                    let paths = derive(&prefix(), config, ws, k).unwrap();
                    assert_eq!(paths.block_table, first.block_table);
                    assert!(seen.insert(paths.scores.clone()), "collision at {:?}", paths.scores);
                    assert!(seen.insert(paths.loadings.clone()), "collision at {:?}", paths.loadings);
                }
            }
        }
        assert!(block_tables.is_disjoint(&seen));
    }

    #[test]
    fn test_unsupported_config_has_no_paths() {
        assert!(derive(&prefix(), WhitenConfig::Unsupported, 0, 100).is_err());
    }
}
