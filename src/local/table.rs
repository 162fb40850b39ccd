// table.rs
//
// On-disk layout for result tables and the block table. Every artifact is a
// directory: assembled under a staging name (in the scratch directory, or
// hidden next to its destination) and renamed into place once complete.
//
//   <artifact>/metadata.json
//   <artifact>/globals.json            (result tables with globals only)
//   <artifact>/parts/part-00000.tsv    (result tables)
//   <artifact>/parts/part-00000.jsonl  (block table, one block per line)

use super::sketch::{BlockSketch, SketchBlock};
use crate::engine::Table;
use crate::error::{PipelineError, Result};
use crate::provenance::Provenance;
use log::{debug, info, warn};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const WRITE_OP: &str = "Writing table";
const READ_OP: &str = "Reading table";
const METADATA_FILE: &str = "metadata.json";
const GLOBALS_FILE: &str = "globals.json";
const PARTS_DIR: &str = "parts";

/// A keyed table of `f64` vectors, e.g. sample scores or variant loadings.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTable {
    pub key_field: String,
    pub value_field: String,
    pub keys: Vec<String>,
    /// One row per key.
    pub values: Array2<f64>,
    pub globals: Option<Provenance>,
    pub n_partitions: usize,
}

impl LocalTable {
    pub fn new(key_field: &str, value_field: &str, keys: Vec<String>, values: Array2<f64>) -> Self {
        Self {
            key_field: key_field.to_string(),
            value_field: value_field.to_string(),
            keys,
            values,
            globals: None,
            n_partitions: 1,
        }
    }

    /// Contiguous row ranges, one per partition; never empty unless the table is.
    pub fn partition_ranges(&self) -> Vec<(usize, usize)> {
        let rows = self.keys.len();
        let parts = self.n_partitions.clamp(1, rows.max(1));
        (0..parts)
            .map(|p| (p * rows / parts, (p + 1) * rows / parts))
            .collect()
    }
}

impl Table for LocalTable {
    fn annotate_globals(mut self, provenance: Provenance) -> Self {
        self.globals = Some(provenance);
        self
    }

    fn repartition(mut self, target_partitions: usize) -> Self {
        self.n_partitions = target_partitions.clamp(1, self.keys.len().max(1));
        self
    }

    fn globals(&self) -> Option<&Provenance> {
        self.globals.as_ref()
    }

    fn num_rows(&self) -> usize {
        self.keys.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Metadata {
    Table {
        key_field: String,
        value_field: String,
        n_rows: usize,
        n_cols: usize,
        n_partitions: usize,
    },
    BlockTable {
        sample_ids: Vec<String>,
        variant_ids: Vec<String>,
        block_size: usize,
        partition_size: usize,
        n_blocks: usize,
        n_partitions: usize,
    },
}

// --- Staging ---

/// Where an artifact is assembled before it is moved to `path`: under
/// `staging_root` if given, otherwise next to the destination. The root must
/// be on the same filesystem as `path`.
fn staging_path(path: &Path, staging_root: Option<&Path>) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    match staging_root {
        Some(root) => root.join(format!("{}.staging", name)),
        None => path.with_file_name(format!(".{}.staging", name)),
    }
}

fn already_exists(path: &Path) -> PipelineError {
    PipelineError::ArtifactAlreadyExists {
        path: path.to_path_buf(),
    }
}

/// Checks the destination and prepares an empty staging directory.
fn begin_write(path: &Path, overwrite: bool, staging_root: Option<&Path>) -> Result<PathBuf> {
    if path.exists() && !overwrite {
        return Err(already_exists(path));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let staging = staging_path(path, staging_root);
    if staging.exists() {
        debug!("Removing leftover staging directory {}", staging.display());
        fs::remove_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;
    }
    let parts = staging.join(PARTS_DIR);
    fs::create_dir_all(&parts).map_err(|e| PipelineError::io(&parts, e))?;
    Ok(staging)
}

fn discard_staging(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        warn!("Could not remove staging directory {}: {}", staging.display(), e);
    }
}

/// Moves the staged artifact into place. Without `overwrite`, anything found
/// at `path` is left alone and the write fails.
fn commit_write(staging: &Path, path: &Path, overwrite: bool) -> Result<()> {
    if overwrite {
        if path.is_dir() {
            fs::remove_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
        } else if path.exists() {
            fs::remove_file(path).map_err(|e| PipelineError::io(path, e))?;
        }
    } else if path.exists() {
        discard_staging(staging);
        return Err(already_exists(path));
    }
    fs::rename(staging, path).map_err(|e| {
        if !overwrite && path.exists() {
            discard_staging(staging);
            already_exists(path)
        } else {
            PipelineError::io(path, e)
        }
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| PipelineError::collaborator(WRITE_OP, e))?;
    writer.flush().map_err(|e| PipelineError::io(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        PipelineError::collaborator(READ_OP, format!("malformed {}: {}", path.display(), e))
    })
}

fn part_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
    dir.join(PARTS_DIR).join(format!("part-{:05}.{}", index, extension))
}

// --- Result tables ---

pub fn write_table(table: &LocalTable, path: &Path, overwrite: bool, staging_root: Option<&Path>) -> Result<()> {
    let staging = begin_write(path, overwrite, staging_root)?;
    let ranges = table.partition_ranges();
    let n_cols = table.values.ncols();
    let header: Vec<String> = std::iter::once(table.key_field.clone())
        .chain((1..=n_cols).map(|i| format!("PC{}", i)))
        .collect();

    for (p, &(start, end)) in ranges.iter().enumerate() {
        let part = part_path(&staging, p, "tsv");
        let file = File::create(&part).map_err(|e| PipelineError::io(&part, e))?;
        let mut writer = BufWriter::new(file);
        let io_err = |e| PipelineError::io(&part, e);
        writeln!(writer, "{}", header.join("\t")).map_err(io_err)?;
        for row in start..end {
            let values: Vec<String> = table.values.row(row).iter().map(|v| v.to_string()).collect();
            writeln!(writer, "{}\t{}", table.keys[row], values.join("\t")).map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
    }

    write_json(
        &staging.join(METADATA_FILE),
        &Metadata::Table {
            key_field: table.key_field.clone(),
            value_field: table.value_field.clone(),
            n_rows: table.keys.len(),
            n_cols,
            n_partitions: ranges.len(),
        },
    )?;
    if let Some(globals) = &table.globals {
        write_json(&staging.join(GLOBALS_FILE), globals)?;
    }
    commit_write(&staging, path, overwrite)?;
    info!(
        "Wrote {} rows in {} partitions to {}",
        table.keys.len(),
        ranges.len(),
        path.display()
    );
    Ok(())
}

pub fn read_table(path: &Path) -> Result<LocalTable> {
    let (key_field, value_field, n_rows, n_cols, n_partitions) = match read_json(&path.join(METADATA_FILE))? {
        Metadata::Table {
            key_field,
            value_field,
            n_rows,
            n_cols,
            n_partitions,
        } => (key_field, value_field, n_rows, n_cols, n_partitions),
        Metadata::BlockTable { .. } => {
            return Err(PipelineError::collaborator(
                READ_OP,
                format!("{} is a block table, not a result table", path.display()),
            ))
        }
    };

    let mut keys = Vec::with_capacity(n_rows);
    let mut values = Array2::<f64>::zeros((n_rows, n_cols));
    for p in 0..n_partitions {
        let part = part_path(path, p, "tsv");
        let file = File::open(&part).map_err(|e| PipelineError::io(&part, e))?;
        for line in BufReader::new(file).lines().skip(1) {
            let line = line.map_err(|e| PipelineError::io(&part, e))?;
            let mut fields = line.split('\t');
            let key = fields.next().unwrap_or_default().to_string();
            let row = keys.len();
            if row >= n_rows {
                return Err(PipelineError::collaborator(
                    READ_OP,
                    format!("{} holds more than the {} rows its metadata declares", path.display(), n_rows),
                ));
            }
            for (col, field) in fields.enumerate().take(n_cols) {
                values[[row, col]] = field.parse().map_err(|e| {
                    PipelineError::collaborator(READ_OP, format!("bad value '{}' in {}: {}", field, part.display(), e))
                })?;
            }
            keys.push(key);
        }
    }
    if keys.len() != n_rows {
        return Err(PipelineError::collaborator(
            READ_OP,
            format!("{} holds {} rows, metadata declares {}", path.display(), keys.len(), n_rows),
        ));
    }

    let globals_path = path.join(GLOBALS_FILE);
    let globals = if globals_path.is_file() {
        Some(read_json(&globals_path)?)
    } else {
        None
    };
    Ok(LocalTable {
        key_field,
        value_field,
        keys,
        values,
        globals,
        n_partitions,
    })
}

// --- Block table ---

pub fn write_sketch(sketch: &BlockSketch, path: &Path, overwrite: bool, staging_root: Option<&Path>) -> Result<()> {
    let staging = begin_write(path, overwrite, staging_root)?;
    let n_partitions = sketch.n_partitions();
    for p in 0..n_partitions {
        let part = part_path(&staging, p, "jsonl");
        let file = File::create(&part).map_err(|e| PipelineError::io(&part, e))?;
        let mut writer = BufWriter::new(file);
        for block in sketch.blocks.iter().filter(|b| b.partition_index == p) {
            serde_json::to_writer(&mut writer, block).map_err(|e| PipelineError::collaborator(WRITE_OP, e))?;
            writer.write_all(b"\n").map_err(|e| PipelineError::io(&part, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(&part, e))?;
    }
    write_json(
        &staging.join(METADATA_FILE),
        &Metadata::BlockTable {
            sample_ids: sketch.sample_ids.clone(),
            variant_ids: sketch.variant_ids.clone(),
            block_size: sketch.block_size,
            partition_size: sketch.partition_size,
            n_blocks: sketch.blocks.len(),
            n_partitions,
        },
    )?;
    commit_write(&staging, path, overwrite)?;
    info!(
        "Checkpointed block table ({} blocks, {} partitions) to {}",
        sketch.blocks.len(),
        n_partitions,
        path.display()
    );
    Ok(())
}

pub fn read_sketch(path: &Path) -> Result<BlockSketch> {
    let metadata: Metadata = read_json(&path.join(METADATA_FILE))?;
    let Metadata::BlockTable {
        sample_ids,
        variant_ids,
        block_size,
        partition_size,
        n_blocks,
        n_partitions,
    } = metadata
    else {
        return Err(PipelineError::collaborator(
            READ_OP,
            format!("{} is a result table, not a block table", path.display()),
        ));
    };

    let mut blocks: Vec<SketchBlock> = Vec::with_capacity(n_blocks);
    for p in 0..n_partitions {
        let part = part_path(path, p, "jsonl");
        let file = File::open(&part).map_err(|e| PipelineError::io(&part, e))?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| PipelineError::io(&part, e))?;
            if line.is_empty() {
                continue;
            }
            let block: SketchBlock = serde_json::from_str(&line).map_err(|e| {
                PipelineError::collaborator(READ_OP, format!("malformed block in {}: {}", part.display(), e))
            })?;
            blocks.push(block);
        }
    }
    blocks.sort_by_key(|b| b.block_index);

    let mut expected_start = 0;
    for block in &blocks {
        if block.row_start != expected_start || block.values.ncols() != sample_ids.len() {
            return Err(PipelineError::collaborator(
                READ_OP,
                format!("block {} in {} does not fit the table layout", block.block_index, path.display()),
            ));
        }
        expected_start += block.values.nrows();
    }
    if blocks.len() != n_blocks || expected_start != variant_ids.len() {
        return Err(PipelineError::collaborator(
            READ_OP,
            format!(
                "{} holds {} blocks covering {} rows, metadata declares {} blocks over {} variants",
                path.display(),
                blocks.len(),
                expected_start,
                n_blocks,
                variant_ids.len()
            ),
        ));
    }
    debug!("Read block table {} ({} blocks)", path.display(), blocks.len());

    Ok(BlockSketch {
        sample_ids,
        variant_ids,
        block_size,
        partition_size,
        blocks,
    })
}
