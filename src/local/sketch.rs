// sketch.rs
//
// Block sketch of the genotype matrix: variants as rows, samples as columns,
// normalized (and optionally whitened) per the sketch parameters, stored as
// consecutive row blocks.

use crate::config::{SketchParams, WhiteningParams};
use crate::error::{PipelineError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewMut1, Axis};
use ndarray_linalg::{Eigh, UPLO};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const OP: &str = "Sketch construction";

/// Anything that can hand out genotype calls in contiguous variant ranges.
pub trait VariantBlockSource: Sync {
    fn sample_ids(&self) -> &[String];
    fn variant_ids(&self) -> &[String];
    /// Dosages for variants `start..end` as a `(end - start) x n_samples`
    /// matrix; missing calls are NaN.
    fn read_variant_block(&self, start: usize, end: usize) -> Result<Array2<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchBlock {
    pub block_index: usize,
    pub partition_index: usize,
    pub row_start: usize,
    /// Shape: `(rows_in_block, n_samples)`.
    pub values: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockSketch {
    pub sample_ids: Vec<String>,
    pub variant_ids: Vec<String>,
    pub block_size: usize,
    pub partition_size: usize,
    pub blocks: Vec<SketchBlock>,
}

impl BlockSketch {
    pub fn n_variants(&self) -> usize {
        self.variant_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_partitions(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.partition_index + 1)
    }

    /// Splits a full `variants x samples` matrix into row blocks.
    #[cfg(test)]
    pub(crate) fn from_rows(
        rows: Array2<f64>,
        sample_ids: Vec<String>,
        variant_ids: Vec<String>,
        block_size: usize,
        partition_size: usize,
    ) -> Self {
        let blocks = rows
            .axis_chunks_iter(Axis(0), block_size)
            .enumerate()
            .map(|(block_index, chunk)| {
                let row_start = block_index * block_size;
                SketchBlock {
                    block_index,
                    partition_index: row_start / partition_size,
                    row_start,
                    values: chunk.to_owned(),
                }
            })
            .collect();
        Self {
            sample_ids,
            variant_ids,
            block_size,
            partition_size,
            blocks,
        }
    }

    /// `A x` for `x` of shape `(n_samples, l)`; result is `(n_variants, l)`.
    pub fn matmul(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        let parts: Vec<Array2<f64>> = self.blocks.par_iter().map(|b| b.values.dot(x)).collect();
        let mut out = Array2::zeros((self.n_variants(), x.ncols()));
        for (block, part) in self.blocks.iter().zip(parts.iter()) {
            out.slice_mut(s![block.row_start..block.row_start + part.nrows(), ..])
                .assign(part);
        }
        out
    }

    /// `Aᵀ y` for `y` of shape `(n_variants, l)`; result is `(n_samples, l)`.
    pub fn t_matmul(&self, y: &ArrayView2<f64>) -> Array2<f64> {
        let n = self.n_samples();
        let l = y.ncols();
        self.blocks
            .par_iter()
            .map(|b| {
                let rows = b.values.nrows();
                b.values
                    .t()
                    .dot(&y.slice(s![b.row_start..b.row_start + rows, ..]))
            })
            .reduce(|| Array2::zeros((n, l)), |a, b| a + b)
    }
}

// --- Construction ---

/// Reads, normalizes and (optionally) whitens the matrix straight into its
/// row blocks. Whitening works in place, so peak memory is one copy of the
/// sketch plus one whitening window.
pub fn build_block_sketch<S: VariantBlockSource>(source: &S, params: &SketchParams) -> Result<BlockSketch> {
    let sample_ids = source.sample_ids().to_vec();
    let variant_ids = source.variant_ids().to_vec();
    let n_samples = sample_ids.len();
    let n_variants = variant_ids.len();
    if n_samples == 0 || n_variants == 0 {
        return Err(PipelineError::collaborator(
            OP,
            format!("matrix is empty ({} variants x {} samples)", n_variants, n_samples),
        ));
    }
    info!(
        "Building block sketch: {} variants x {} samples, block_size={}, partition_size={}, whitening={:?}",
        n_variants, n_samples, params.block_size, params.partition_size, params.whitening
    );

    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} variants ETA: {eta}")
        .map_err(|e| PipelineError::collaborator(OP, format!("progress bar style: {}", e)))?
        .progress_chars("=> ");
    let pb = ProgressBar::new(n_variants as u64).with_style(style);

    let mut blocks = Vec::with_capacity(n_variants.div_ceil(params.block_size));
    for (block_index, start) in (0..n_variants).step_by(params.block_size).enumerate() {
        let end = (start + params.block_size).min(n_variants);
        let mut values = source.read_variant_block(start, end)?;
        if values.dim() != (end - start, n_samples) {
            return Err(PipelineError::collaborator(
                OP,
                format!(
                    "variant block {}..{} has shape {:?}, expected ({}, {})",
                    start,
                    end,
                    values.dim(),
                    end - start,
                    n_samples
                ),
            ));
        }
        values
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|row| normalize_row(row, params.mean_center, params.hwe_normalize));
        blocks.push(SketchBlock {
            block_index,
            partition_index: start / params.partition_size,
            row_start: start,
            values,
        });
        pb.inc((end - start) as u64);
    }
    pb.finish_and_clear();

    if let Some(whitening) = params.whitening {
        whiten_blocks(&mut blocks, n_variants, whitening)?;
    }

    if params.normalize_after_whiten {
        if params.whitening.is_none() {
            debug!("normalize_after_whiten set without whitening; rows are rescaled after normalization.");
        }
        blocks.par_iter_mut().for_each(|block| {
            block
                .values
                .axis_iter_mut(Axis(0))
                .for_each(rescale_to_unit_mean_square)
        });
    }

    let sketch = BlockSketch {
        sample_ids,
        variant_ids,
        block_size: params.block_size,
        partition_size: params.partition_size,
        blocks,
    };
    info!(
        "Block sketch built: {} blocks in {} partitions.",
        sketch.blocks.len(),
        sketch.n_partitions()
    );
    Ok(sketch)
}

/// Mean-imputes missing calls, then optionally centers and HWE-scales.
fn normalize_row(mut row: ArrayViewMut1<f64>, mean_center: bool, hwe_normalize: bool) {
    let (sum, count) = row
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        row.fill(0.0);
        return;
    }
    let mean = sum / count as f64;
    row.mapv_inplace(|v| if v.is_nan() { mean } else { v });

    if mean_center {
        row -= mean;
    }
    if hwe_normalize {
        let p = mean / 2.0;
        let hwe_var = 2.0 * p * (1.0 - p);
        if hwe_var <= 1e-12 {
            row.fill(0.0);
        } else {
            row /= hwe_var.sqrt();
        }
    }
}

fn rescale_to_unit_mean_square(mut row: ArrayViewMut1<f64>) {
    let n = row.len() as f64;
    let mean_square = row.iter().map(|v| v * v).sum::<f64>() / n;
    if mean_square > 1e-24 {
        row /= mean_square.sqrt();
    } else {
        row.fill(0.0);
    }
}

/// Eigenvalues of the window Gram matrix below this fraction of the largest
/// are treated as zero.
const WINDOW_RANK_TOLERANCE: f64 = 1e-10;

/// Orthonormal basis (`n_samples x rank`) of the span of the window rows,
/// or `None` if the window spans nothing.
fn window_basis(window: &Array2<f64>) -> Result<Option<Array2<f64>>> {
    let gram = window.dot(&window.t());
    let (evals, evecs): (Array1<f64>, Array2<f64>) = gram
        .eigh(UPLO::Lower)
        .map_err(|e| PipelineError::collaborator(OP, format!("eigendecomposition of whitening window failed: {}", e)))?;
    let largest = evals.iter().cloned().fold(0.0, f64::max);
    if largest <= 0.0 {
        return Ok(None);
    }
    let kept: Vec<usize> = (0..evals.len())
        .filter(|&i| evals[i] > largest * WINDOW_RANK_TOLERANCE)
        .collect();
    // Wᵀv / sqrt(λ) has unit norm and is orthogonal to the other kept directions.
    let mut basis = window.t().dot(&evecs.select(Axis(1), &kept));
    for (mut column, &i) in basis.axis_iter_mut(Axis(1)).zip(kept.iter()) {
        column /= evals[i].sqrt();
    }
    Ok(Some(basis))
}

/// Copies rows `start..end` of the sketch out of its blocks.
fn gather_rows(blocks: &[SketchBlock], start: usize, end: usize, n_samples: usize) -> Array2<f64> {
    let mut out = Array2::zeros((end - start, n_samples));
    for block in blocks {
        let block_end = block.row_start + block.values.nrows();
        let lo = start.max(block.row_start);
        let hi = end.min(block_end);
        if lo < hi {
            out.slice_mut(s![lo - start..hi - start, ..])
                .assign(&block.values.slice(s![lo - block.row_start..hi - block.row_start, ..]));
        }
    }
    out
}

/// Projects out of every row the span of the `window_size` normalized rows
/// preceding its whitening chunk. Chunks are visited last to first, so each
/// window is still unwhitened when it is read.
fn whiten_blocks(blocks: &mut [SketchBlock], n_variants: usize, whitening: WhiteningParams) -> Result<()> {
    let n_samples = blocks.first().map_or(0, |b| b.values.ncols());
    debug!(
        "Whitening {} rows: window_size={}, whiten_block_size={}",
        n_variants, whitening.window_size, whitening.block_size
    );

    let chunk_starts: Vec<usize> = (0..n_variants).step_by(whitening.block_size).collect();
    for &chunk_start in chunk_starts.iter().rev() {
        let chunk_end = (chunk_start + whitening.block_size).min(n_variants);
        let window_start = chunk_start.saturating_sub(whitening.window_size);
        if window_start == chunk_start {
            continue;
        }

        let window = gather_rows(blocks, window_start, chunk_start, n_samples);
        let Some(basis) = window_basis(&window)? else {
            continue;
        };
        if basis.ncols() >= n_samples {
            warn!(
                "Whitening window before row {} spans all {} samples; rows {}..{} become zero.",
                chunk_start, n_samples, chunk_start, chunk_end
            );
        }

        blocks.par_iter_mut().for_each(|block| {
            let block_end = block.row_start + block.values.nrows();
            let lo = chunk_start.max(block.row_start);
            let hi = chunk_end.min(block_end);
            if lo < hi {
                let mut rows = block
                    .values
                    .slice_mut(s![lo - block.row_start..hi - block.row_start, ..]);
                let projection = rows.dot(&basis).dot(&basis.t());
                rows -= &projection;
            }
        });
    }
    Ok(())
}
