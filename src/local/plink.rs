// plink.rs

use super::sketch::VariantBlockSource;
use crate::engine::GenotypeMatrix;
use crate::error::{PipelineError, Result};
use bed_reader::{Bed, ReadOptions};
use log::{debug, info};
use ndarray::Array2;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const OP: &str = "Reading genotype matrix";

/// A PLINK .bed/.bim/.fam trio. Metadata is read once on open; genotype
/// calls are read lazily one variant block at a time.
#[derive(Debug, Clone)]
pub struct PlinkMatrix {
    bed_path: PathBuf,
    sample_ids: Vec<String>,
    variant_ids: Vec<String>,
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl PlinkMatrix {
    /// Opens `{prefix}.bed` and its sibling metadata files.
    pub fn open(prefix: &Path) -> Result<Self> {
        let bed_path = with_suffix(prefix, ".bed");
        if !bed_path.is_file() {
            return Err(PipelineError::collaborator(
                OP,
                format!("no PLINK .bed file at {}", bed_path.display()),
            ));
        }
        info!("Opening PLINK matrix: {}", bed_path.display());

        let bed_err = |e: Box<bed_reader::BedErrorPlus>| {
            PipelineError::collaborator(OP, format!("bed_reader error for {}: {}", bed_path.display(), e))
        };
        let mut bed = Bed::new(&bed_path).map_err(bed_err)?;

        let sample_ids: Vec<String> = bed.iid().map_err(bed_err)?.iter().cloned().collect();
        let chromosomes = bed.chromosome().map_err(bed_err)?.to_owned();
        let positions = bed.bp_position().map_err(bed_err)?.to_owned();
        let allele_1 = bed.allele_1().map_err(bed_err)?.to_owned();
        let allele_2 = bed.allele_2().map_err(bed_err)?.to_owned();

        let variant_ids: Vec<String> = chromosomes
            .iter()
            .zip(positions.iter())
            .zip(allele_1.iter().zip(allele_2.iter()))
            .map(|((chrom, pos), (a1, a2))| format!("{}:{}:{}:{}", chrom, pos, a1, a2))
            .collect();

        debug!(
            "PLINK metadata loaded: {} samples, {} variants.",
            sample_ids.len(),
            variant_ids.len()
        );
        Ok(Self {
            bed_path,
            sample_ids,
            variant_ids,
        })
    }
}

impl GenotypeMatrix for PlinkMatrix {
    fn count(&self) -> (u64, u64) {
        (self.variant_ids.len() as u64, self.sample_ids.len() as u64)
    }
}

impl VariantBlockSource for PlinkMatrix {
    fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    fn variant_ids(&self) -> &[String] {
        &self.variant_ids
    }

    /// Allele-1 dosages for variants `start..end`, variants as rows, missing
    /// calls as NaN.
    fn read_variant_block(&self, start: usize, end: usize) -> Result<Array2<f64>> {
        let mut bed = Bed::new(&self.bed_path).map_err(|e| {
            PipelineError::collaborator(OP, format!("bed_reader error for {}: {}", self.bed_path.display(), e))
        })?;
        let sid_index: Vec<isize> = (start..end).map(|i| i as isize).collect();
        let samples_by_variants = ReadOptions::builder()
            .sid_index(&sid_index)
            .f64()
            .count_a1()
            .read(&mut bed)
            .map_err(|e| {
                PipelineError::collaborator(
                    OP,
                    format!("failed to read variants {}..{} from {}: {}", start, end, self.bed_path.display(), e),
                )
            })?;
        Ok(samples_by_variants.reversed_axes())
    }
}
