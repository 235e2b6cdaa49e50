//! The module that implements the `tankcheck compare` command.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tankcheck::backend::artifact::{Manifest, read_tensor, tensor_path};
use tankcheck::{CompareError, Tensor, TensorDetails, compare_results};
use tankcheck_cli_flags::CommonOptions;

/// Compares two directories of output tensors.
#[derive(Parser, PartialEq)]
pub struct CompareCommand {
    #[command(flatten)]
    common: CommonOptions,

    /// The model artifact directory whose output details shape the tensors
    #[arg(long, required = true, value_name = "MODEL_DIR")]
    model: PathBuf,

    /// Directory of candidate outputs (`0.bin`, `1.bin`, ...)
    #[arg(required = true, value_name = "CANDIDATE_DIR")]
    candidate: PathBuf,

    /// Directory of reference outputs (`0.bin`, `1.bin`, ...)
    #[arg(required = true, value_name = "REFERENCE_DIR")]
    reference: PathBuf,
}

impl CompareCommand {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        self.common.init_logging()?;

        let manifest = Manifest::load(&self.model)
            .with_context(|| format!("failed to open model: {}", self.model.display()))?;
        let candidate_count = count_results(&self.candidate)?;
        let reference_count = count_results(&self.reference)?;
        if candidate_count != reference_count {
            return Err(CompareError::LengthMismatch {
                candidate: candidate_count,
                reference: reference_count,
            }
            .into());
        }
        let candidate = read_results(&self.candidate, candidate_count, &manifest.outputs)?;
        let reference = read_results(&self.reference, reference_count, &manifest.outputs)?;

        for slot in compare_results(&candidate, &reference, &manifest.outputs)? {
            println!(
                "output {} ({}): max error {}",
                slot.index, slot.name, slot.max_error
            );
        }
        Ok(())
    }
}

/// Count `0.bin`, `1.bin`, ... in `dir` up to the first missing index.
fn count_results(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        bail!("results directory is not a valid directory: {}", dir.display());
    }
    let mut count = 0;
    while tensor_path(dir, count).is_file() {
        count += 1;
    }
    Ok(count)
}

/// Read the first `count` result files of `dir`, shaped by `details`.
fn read_results(dir: &Path, count: usize, details: &[TensorDetails]) -> Result<Vec<Tensor>> {
    if count > details.len() {
        bail!(
            "{} holds {count} results but the model has {} outputs",
            dir.display(),
            details.len()
        );
    }
    (0..count)
        .map(|i| {
            let path = tensor_path(dir, i);
            read_tensor(&path, &details[i])
                .with_context(|| format!("failed to read results: {}", path.display()))
        })
        .collect()
}
