// rsvd.rs
//
// Randomized PCA and stochastic spectral-moment estimation over a block
// sketch A (variants x samples). Eigenvalues are those of AᵀA.

use super::sketch::BlockSketch;
use crate::error::{PipelineError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, Axis};
use ndarray_linalg::{Eigh, QR, UPLO};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use statrs::statistics::Statistics;

const PCA_OP: &str = "Randomized PCA";
const MOMENTS_OP: &str = "Spectral moment estimation";

#[derive(Debug, Clone)]
pub struct PcaOutput {
    /// Descending.
    pub eigenvalues: Vec<f64>,
    /// `(n_samples, k)`; column i is the i-th right singular vector scaled by
    /// its singular value.
    pub scores: Array2<f64>,
    /// `(n_variants, k)`; left singular vectors.
    pub loadings: Option<Array2<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MomentEstimates {
    /// Estimates of tr((AᵀA)^i), i = 1..=num_moments.
    pub moments: Vec<f64>,
    pub standard_errors: Vec<f64>,
}

fn orthonormalize(y: Array2<f64>, op: &'static str) -> Result<Array2<f64>> {
    let (q, _r) = y
        .qr()
        .map_err(|e| PipelineError::collaborator(op, format!("QR factorization failed: {}", e)))?;
    Ok(q)
}

/// Halko-style randomized range finder with `q_iterations` rounds of power
/// iteration, followed by an exact eigendecomposition of the projected Gram
/// matrix.
pub fn randomized_pca(
    sketch: &BlockSketch,
    k: usize,
    oversampling: usize,
    q_iterations: usize,
    compute_loadings: bool,
    seed: u64,
) -> Result<PcaOutput> {
    let m = sketch.n_variants();
    let n = sketch.n_samples();
    if k == 0 || m == 0 || n == 0 {
        return Err(PipelineError::collaborator(
            PCA_OP,
            format!("cannot compute {} components of a {} x {} matrix", k, m, n),
        ));
    }
    let l = (k + oversampling).min(m).min(n);
    let k_eff = k.min(l);
    if k_eff < k {
        warn!(
            "Requested k={} exceeds the rank bound of a {} x {} matrix; computing {} components.",
            k, m, n, k_eff
        );
    }
    info!(
        "Randomized PCA: k={}, sketch width={}, power iterations={}, seed={}",
        k_eff, l, q_iterations, seed
    );

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let omega = Array2::from_shape_simple_fn((n, l), || rng.sample::<f64, _>(StandardNormal));

    let mut q = orthonormalize(sketch.matmul(&omega.view()), PCA_OP)?;
    for iteration in 0..q_iterations {
        let z = orthonormalize(sketch.t_matmul(&q.view()), PCA_OP)?;
        q = orthonormalize(sketch.matmul(&z.view()), PCA_OP)?;
        debug!("Power iteration {}/{} done.", iteration + 1, q_iterations);
    }

    // B = QᵀA; its Gram matrix B Bᵀ carries the squared singular values.
    let at_q = sketch.t_matmul(&q.view());
    let gram = at_q.t().dot(&at_q);
    let (evals, evecs): (Array1<f64>, Array2<f64>) = gram
        .eigh(UPLO::Lower)
        .map_err(|e| PipelineError::collaborator(PCA_OP, format!("eigendecomposition failed: {}", e)))?;

    // eigh returns ascending order.
    let top: Vec<usize> = (l - k_eff..l).rev().collect();
    let u_b = evecs.select(Axis(1), &top);
    let eigenvalues: Vec<f64> = top.iter().map(|&i| evals[i].max(0.0)).collect();

    let scores = at_q.dot(&u_b);
    let loadings = compute_loadings.then(|| q.dot(&u_b));
    debug!("Top eigenvalues: {:?}", &eigenvalues[..eigenvalues.len().min(5)]);

    Ok(PcaOutput {
        eigenvalues,
        scores,
        loadings,
    })
}

/// Hutchinson trace estimates of tr((AᵀA)^i) from `samples` Rademacher probes.
pub fn spectral_moments(sketch: &BlockSketch, num_moments: usize, samples: usize, seed: u64) -> Result<MomentEstimates> {
    if num_moments == 0 {
        return Ok(MomentEstimates {
            moments: Vec::new(),
            standard_errors: Vec::new(),
        });
    }
    if samples == 0 {
        return Err(PipelineError::collaborator(
            MOMENTS_OP,
            format!("{} moments requested with no probe vectors", num_moments),
        ));
    }
    if samples < 2 {
        warn!("A single probe vector gives no standard error; reporting NaN.");
    }
    info!("Estimating {} spectral moments with {} probes.", num_moments, samples);

    let n = sketch.n_samples();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let probes = Array2::from_shape_simple_fn((n, samples), || if rng.random::<bool>() { 1.0 } else { -1.0 });

    let mut moments = Vec::with_capacity(num_moments);
    let mut standard_errors = Vec::with_capacity(num_moments);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] moment {pos}/{len}")
        .map_err(|e| PipelineError::collaborator(MOMENTS_OP, format!("progress bar style: {}", e)))?
        .progress_chars("=> ");
    let pb = ProgressBar::new(num_moments as u64).with_style(style);

    let mut v = probes.clone();
    for power in 1..=num_moments {
        let av = sketch.matmul(&v.view());
        v = sketch.t_matmul(&av.view());
        let estimates: Vec<f64> = (0..samples)
            .map(|j| probes.slice(s![.., j]).dot(&v.slice(s![.., j])))
            .collect();
        let mean = estimates.iter().mean();
        let se = if samples < 2 {
            f64::NAN
        } else {
            estimates.iter().std_dev() / (samples as f64).sqrt()
        };
        if !mean.is_finite() {
            return Err(PipelineError::collaborator(
                MOMENTS_OP,
                format!("moment {} is not finite", power),
            ));
        }
        debug!("Moment {}: {:.6e} (se {:.3e})", power, mean, se);
        moments.push(mean);
        standard_errors.push(se);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(MomentEstimates {
        moments,
        standard_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Rank-3 matrix with known singular values 10, 5, 2.
    fn low_rank_sketch() -> (BlockSketch, Array2<f64>) {
        let m = 40;
        let n = 25;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let u = orthonormalize(
            Array2::from_shape_simple_fn((m, 3), || rng.sample::<f64, _>(StandardNormal)),
            PCA_OP,
        )
        .unwrap();
        let v = orthonormalize(
            Array2::from_shape_simple_fn((n, 3), || rng.sample::<f64, _>(StandardNormal)),
            PCA_OP,
        )
        .unwrap();
        let sigma = Array2::from_diag(&array![10.0, 5.0, 2.0]);
        let a = u.dot(&sigma).dot(&v.t());
        let sample_ids = (0..n).map(|i| format!("S{}", i)).collect();
        let variant_ids = (0..m).map(|i| format!("v{}", i)).collect();
        (BlockSketch::from_rows(a.clone(), sample_ids, variant_ids, 7, 14), a)
    }

    #[test]
    fn test_recovers_eigenvalues_of_low_rank_matrix() {
        let (sketch, _) = low_rank_sketch();
        let out = randomized_pca(&sketch, 3, 5, 2, true, 11).unwrap();
        assert_eq!(out.eigenvalues.len(), 3);
        assert_relative_eq!(out.eigenvalues[0], 100.0, max_relative = 1e-8);
        assert_relative_eq!(out.eigenvalues[1], 25.0, max_relative = 1e-8);
        assert_relative_eq!(out.eigenvalues[2], 4.0, max_relative = 1e-8);
        assert_eq!(out.scores.dim(), (25, 3));
        assert_eq!(out.loadings.as_ref().map(|l| l.dim()), Some((40, 3)));
    }

    #[test]
    fn test_scores_and_loadings_reconstruct_the_matrix() {
        let (sketch, a) = low_rank_sketch();
        let out = randomized_pca(&sketch, 3, 4, 1, true, 3).unwrap();
        let loadings = out.loadings.unwrap();
        // A = U Σ Vᵀ = loadings · scoresᵀ
        let rebuilt = loadings.dot(&out.scores.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-8, "{} vs {}", x, y);
        }
        // Score column norms are the singular values.
        let norm0 = out.scores.column(0).dot(&out.scores.column(0)).sqrt();
        assert_relative_eq!(norm0, 10.0, max_relative = 1e-8);
    }

    #[test]
    fn test_k_is_capped_by_matrix_shape() {
        let a = array![[1.0, 0.0, 2.0], [0.0, 3.0, 1.0]];
        let sketch = BlockSketch::from_rows(
            a,
            vec!["a".into(), "b".into(), "c".into()],
            vec!["x".into(), "y".into()],
            1,
            1,
        );
        let out = randomized_pca(&sketch, 10, 10, 0, false, 0).unwrap();
        assert_eq!(out.eigenvalues.len(), 2);
        assert!(out.eigenvalues[0] >= out.eigenvalues[1]);
        assert!(out.loadings.is_none());
    }

    #[test]
    fn test_same_seed_gives_same_result() {
        let (sketch, _) = low_rank_sketch();
        let a = randomized_pca(&sketch, 2, 2, 0, false, 99).unwrap();
        let b = randomized_pca(&sketch, 2, 2, 0, false, 99).unwrap();
        assert_eq!(a.eigenvalues, b.eigenvalues);
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn test_moment_estimates_bracket_true_traces() {
        let (sketch, _) = low_rank_sketch();
        // tr(AᵀA) = 100 + 25 + 4, tr((AᵀA)^2) = 10^4 + 5^4 + 2^4.
        let est = spectral_moments(&sketch, 2, 4000, 5).unwrap();
        assert_eq!(est.moments.len(), 2);
        assert_eq!(est.standard_errors.len(), 2);
        assert!((est.moments[0] - 129.0).abs() < 4.0 * est.standard_errors[0] + 1e-9);
        assert!((est.moments[1] - 10641.0).abs() < 4.0 * est.standard_errors[1] + 1e-6);
        assert!(est.standard_errors.iter().all(|se| *se >= 0.0));
    }

    #[test]
    fn test_zero_moments_is_empty() {
        let (sketch, _) = low_rank_sketch();
        let est = spectral_moments(&sketch, 0, 0, 0).unwrap();
        assert!(est.moments.is_empty() && est.standard_errors.is_empty());
    }

    #[test]
    fn test_moments_without_probes_fail() {
        let (sketch, _) = low_rank_sketch();
        assert!(matches!(
            spectral_moments(&sketch, 3, 0, 0),
            Err(PipelineError::Collaborator { .. })
        ));
    }
}
