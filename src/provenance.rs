// provenance.rs

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global metadata attached to the scores and loadings tables of a run.
///
/// `spectral_moments[0]` is the exact 0th moment (the sample count) and
/// `standard_errors[0]` is always `None`: there is nothing to estimate for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub name: String,
    pub eigenvalues: Vec<f64>,
    pub spectral_moments: Vec<f64>,
    pub standard_errors: Vec<Option<f64>>,
    pub m_variants: u64,
    pub n_samples: u64,
}

pub fn annotate(
    path: &Path,
    eigenvalues: &[f64],
    moments: &[f64],
    standard_errors: &[f64],
    m_variants: u64,
    n_samples: u64,
) -> Provenance {
    let spectral_moments = std::iter::once(n_samples as f64)
        .chain(moments.iter().copied())
        .collect();
    let standard_errors = std::iter::once(None)
        .chain(standard_errors.iter().copied().map(Some))
        .collect();

    Provenance {
        name: path.display().to_string(),
        eigenvalues: eigenvalues.to_vec(),
        spectral_moments,
        standard_errors,
        m_variants,
        n_samples,
    }
}

impl Provenance {
    /// Same metadata under a different identity.
    pub fn renamed(&self, path: &Path) -> Provenance {
        Provenance {
            name: path.display().to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_zeroth_moment_and_missing_stderr_are_prepended() {
        let moments: Vec<f64> = (1..=10).map(|i| i as f64 * 1.5).collect();
        let stderrs: Vec<f64> = (1..=10).map(|i| i as f64 * 0.01).collect();
        let prov = annotate(
            Path::new("out/full-scores-ws0-k100.ht"),
            &[3.0, 2.0, 1.0],
            &moments,
            &stderrs,
            147_604,
            406_696,
        );

        assert_eq!(prov.spectral_moments.len(), 11);
        assert_eq!(prov.spectral_moments[0], 406_696.0);
        assert_eq!(&prov.spectral_moments[1..], moments.as_slice());

        assert_eq!(prov.standard_errors.len(), 11);
        assert_eq!(prov.standard_errors[0], None);
        assert!(prov.standard_errors[1..].iter().all(Option::is_some));

        assert_eq!(prov.name, "out/full-scores-ws0-k100.ht");
        assert_eq!((prov.m_variants, prov.n_samples), (147_604, 406_696));
    }

    #[test]
    fn test_no_moments_still_carries_zeroth() {
        let prov = annotate(Path::new("x.ht"), &[], &[], &[], 5, 7);
        assert_eq!(prov.spectral_moments, vec![7.0]);
        assert_eq!(prov.standard_errors, vec![None]);
    }

    #[test]
    fn test_renamed_only_changes_identity() {
        let scores = annotate(Path::new("a/scores.ht"), &[2.0], &[1.0, 0.5], &[0.1, 0.2], 3, 4);
        let loadings = scores.renamed(&PathBuf::from("a/loadings.ht"));
        assert_ne!(scores.name, loadings.name);
        assert_eq!(scores, Provenance { name: scores.name.clone(), ..loadings.clone() });
    }

    #[test]
    fn test_missing_sentinel_serializes_as_null() {
        let prov = annotate(Path::new("x.ht"), &[1.0], &[2.0], &[0.5], 1, 2);
        let json = serde_json::to_value(&prov).unwrap();
        assert!(json["standard_errors"][0].is_null());
        assert_eq!(json["standard_errors"][1], 0.5);
        assert_eq!(json["spectral_moments"][0], 2.0);
    }
}
